//! Support to read media from S3-compatible buckets.

use std::fmt;

use aws_config::Region;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
pub use aws_sdk_s3::Error as S3Error;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt, TryStreamExt};

use super::{ObjectStore, ObjectStream, StoreError};
use crate::config::S3Settings;

/// An [`ObjectStore`] backed by a single bucket.
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl fmt::Debug for S3Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Store")
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl S3Store {
    pub async fn new(settings: S3Settings) -> Self {
        let credentials = Credentials::from_keys(settings.access_key, settings.secret_key, None);
        let config = aws_config::from_env()
            .credentials_provider(credentials)
            .region(Region::new(settings.region))
            .endpoint_url(&settings.endpoint)
            .load()
            .await;

        // Virtual-host addressing is not supported by most S3-compatible providers, B2 included.
        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(true)
            .build();

        tracing::debug!(
            endpoint = %settings.endpoint,
            bucket = %settings.bucket,
            "Created S3 client"
        );

        Self {
            client: Client::from_conf(s3_config),
            bucket: settings.bucket,
        }
    }

    async fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut continuation_token = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|err| classify_error(&self.bucket, "list", err))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key())
                    // directory markers created by web consoles
                    .filter(|key| !key.ends_with('/'))
                    .map(str::to_owned),
            );

            match response.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_owned()),
                None => break,
            }
        }

        tracing::debug!(bucket = %self.bucket, count = keys.len(), "Listed S3 bucket");
        metric!(gauge("store.s3.keys") = keys.len() as u64);

        Ok(keys)
    }

    async fn get_object(&self, key: &str) -> Result<ObjectStream, StoreError> {
        tracing::debug!("Fetching from s3: {} (from {})", key, &self.bucket);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| classify_error(&self.bucket, key, err))?;

        let mut body = Box::pin(response.body);
        let stream = futures::stream::poll_fn(move |cx| body.as_mut().poll_next(cx))
            .map_err(|err| StoreError::unavailable(&err));

        Ok(stream.boxed())
    }
}

impl ObjectStore for S3Store {
    fn list(&self) -> BoxFuture<'_, Result<Vec<String>, StoreError>> {
        self.list_keys().boxed()
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<ObjectStream, StoreError>> {
        self.get_object(key).boxed()
    }
}

/// Maps an SDK error to the store error it represents.
///
/// The errors and status codes are explained here:
/// <https://docs.aws.amazon.com/AmazonS3/latest/API/ErrorResponses.html#ErrorCodeList>
fn classify_error<E>(bucket: &str, key: &str, err: SdkError<E>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    S3Error: From<SdkError<E>>,
{
    tracing::debug!("Failed S3 request for s3://{}/{}: {}", bucket, key, err);

    match &err {
        SdkError::TimeoutError(_) => {
            tracing::warn!(
                error = &err as &dyn std::error::Error,
                "S3 request timed out",
            );
            return StoreError::unavailable(&err);
        }
        SdkError::ServiceError(service_err) => {
            let status = service_err.raw().status();
            let code = service_err.err().code();

            // NOTE: empty credentials lead to an `AuthorizationHeaderMalformed` error.
            if matches!(status.as_u16(), 401 | 403) || code == Some("AuthorizationHeaderMalformed")
            {
                let details = service_err.err().message().unwrap_or_default().to_string();
                return StoreError::PermissionDenied(details);
            }
        }
        _ => {}
    }

    let err = S3Error::from(err);
    match &err {
        S3Error::NoSuchBucket(_) | S3Error::NoSuchKey(_) | S3Error::NotFound(_) => {
            StoreError::NotFound
        }
        // The `From` impl does not map every operation's variants, so match on the code as well.
        _ if matches!(err.code(), Some("NoSuchBucket" | "NoSuchKey" | "NotFound")) => {
            StoreError::NotFound
        }
        _ => {
            tracing::debug!(
                error = &err as &dyn std::error::Error,
                "S3 request failed: {:?}",
                err.code(),
            );
            StoreError::unavailable(&err)
        }
    }
}

#[cfg(test)]
mod tests {
    use aws_sdk_s3::operation::get_object::GetObjectError;

    use super::*;

    #[test]
    fn test_timeout_is_unavailable() {
        let err = SdkError::<GetObjectError>::timeout_error("connect timed out");
        match classify_error("media", "a.mp3", err) {
            StoreError::Unavailable(message) => {
                assert!(message.contains("connect timed out"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

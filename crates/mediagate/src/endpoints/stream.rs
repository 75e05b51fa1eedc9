use std::io::SeekFrom;
use std::path::Path;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, Method, Response, StatusCode, header};
use mediagate_service::services::MediaService;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use super::ResponseError;
use super::range::{ByteRange, InvalidRange, Range};

/// Characters escaped when a key is placed into the `file` query parameter.
///
/// Besides everything the URL syntax reserves for queries and fragments, this includes `+`, which
/// form decoding would turn into a space. Non-ASCII characters are always escaped.
const QUERY_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    file: Option<String>,
}

pub async fn stream_media(
    State(service): State<MediaService>,
    Query(query): Query<StreamQuery>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response<Body>, ResponseError> {
    let transaction = transaction_name(&method);
    sentry::configure_scope(|scope| {
        scope.set_transaction(Some(&transaction));
    });

    match query.file.filter(|file| !file.is_empty()) {
        None => redirect_to_random(&service).await,
        Some(key) => serve_object(&service, &key, &method, &headers).await,
    }
}

fn transaction_name(method: &Method) -> String {
    format!("{method} /stream")
}

/// The URL of the stream endpoint for `key`.
fn stream_location(key: &str) -> String {
    format!("/stream?file={}", utf8_percent_encode(key, QUERY_VALUE))
}

async fn redirect_to_random(service: &MediaService) -> Result<Response<Body>, ResponseError> {
    let key = service.pick_random().await?;
    tracing::debug!(%key, "Redirecting to random file");

    Ok(Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, stream_location(&key))
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::empty())?)
}

/// Picks the range to serve, or `Err` with the response to a range that cannot be satisfied.
fn requested_range(headers: &HeaderMap, size: u64) -> Result<Option<Range>, Response<Body>> {
    let Some(value) = headers.get(header::RANGE) else {
        return Ok(None);
    };

    let parsed = value
        .to_str()
        .map_err(|_| InvalidRange::Malformed)
        .and_then(str::parse::<ByteRange>);

    match parsed {
        Ok(range) => match range.resolve(size) {
            Some(range) => Ok(Some(range)),
            None => Err(range_not_satisfiable(size)),
        },
        Err(InvalidRange::MultipleRanges) => Ok(None),
        Err(err) => {
            tracing::debug!(?value, "Rejecting range: {err}");
            Err(range_not_satisfiable(size))
        }
    }
}

fn range_not_satisfiable(size: u64) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
    let headers = response.headers_mut();
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Ok(value) = HeaderValue::try_from(format!("bytes */{size}")) {
        headers.insert(header::CONTENT_RANGE, value);
    }
    response
}

async fn serve_object(
    service: &MediaService,
    key: &str,
    method: &Method,
    headers: &HeaderMap,
) -> Result<Response<Body>, ResponseError> {
    let object = service
        .resolve(key)
        .await
        .map_err(|err| ResponseError::from(err).context(format!("failed to resolve {key:?}")))?;

    let size = object.size();
    let range = match requested_range(headers, size) {
        Ok(range) => range,
        Err(response) => return Ok(response),
    };

    let mut response = Response::builder()
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_TYPE, content_type(key));

    let (offset, len) = match range {
        Some(range) => {
            response = response
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_RANGE, range.content_range(size));
            (range.start, range.size())
        }
        None => (0, size),
    };
    let response = response.header(header::CONTENT_LENGTH, len);

    if *method == Method::HEAD {
        return Ok(response.body(Body::empty())?);
    }

    let mut file = object.open().await?;
    if offset > 0 {
        file.seek(SeekFrom::Start(offset)).await?;
    }
    let body = Body::from_stream(ReaderStream::new(file.take(len)));

    Ok(response.body(body)?)
}

/// Guesses the media type from the extension of the key.
fn content_type(key: &str) -> &'static str {
    let extension = Path::new(key)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("m4a") => "audio/mp4",
        Some("aac") => "audio/aac",
        Some("flac") => "audio/flac",
        Some("ogg" | "oga") => "audio/ogg",
        Some("opus") => "audio/opus",
        Some("wav") => "audio/wav",
        Some("weba") => "audio/webm",
        Some("mp4" | "m4v") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("mov") => "video/quicktime",
        Some("ogv") => "video/ogg",
        Some("avi") => "video/x-msvideo",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

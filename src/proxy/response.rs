use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream::BoxStream};
use rama::http::{Body, HeaderMap, HeaderValue, Method, Response, StatusCode, header};
use tracing::{debug, warn};

use super::headers;
use crate::error::{RelayError, RelayResult};
use crate::registry::AuthChallenge;

/// Path on the proxy that rewritten challenges point clients at.
pub const TOKEN_PATH: &str = "/auth/token";

/// Responds with plain text
pub fn respond_text(status: StatusCode, body: &str) -> RelayResult<Response<Body>> {
    Response::builder()
        .status(status)
        .header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        )
        .body(Body::from(body.to_owned()))
        .map_err(|err| RelayError::Response(err.to_string()))
}

/// Last-resort error response when even building the text response fails.
pub fn respond_error(err: &RelayError) -> Response<Body> {
    respond_text(err.status(), err.public_message()).unwrap_or_else(|_| {
        let mut resp = Response::new(Body::empty());
        *resp.status_mut() = err.status();
        resp
    })
}

pub fn proxy_realm(proxy_host: &str) -> String {
    format!("https://{proxy_host}{TOKEN_PATH}")
}

/// Points a Bearer challenge at the proxy's own token path.
///
/// Values that do not parse as a complete challenge are left alone, so an
/// unresolvable 401 reaches the client exactly as the registry sent it.
pub fn rewrite_challenge(value: &HeaderValue, proxy_host: &str) -> Option<HeaderValue> {
    let challenge = AuthChallenge::parse(value.to_str().ok()?).ok()?;
    let rewritten = challenge.with_realm(proxy_realm(proxy_host));
    HeaderValue::from_str(&rewritten.to_header_value()).ok()
}

fn outbound_headers(source: &HeaderMap, proxy_host: Option<&str>) -> HeaderMap {
    let mut target = HeaderMap::with_capacity(source.len());
    headers::copy_response_headers(source, &mut target);

    if let Some(proxy_host) = proxy_host
        && target.contains_key(header::WWW_AUTHENTICATE)
    {
        let rewritten: Vec<HeaderValue> = target
            .get_all(header::WWW_AUTHENTICATE)
            .iter()
            .map(|value| rewrite_challenge(value, proxy_host).unwrap_or_else(|| value.clone()))
            .collect();
        target.remove(header::WWW_AUTHENTICATE);
        for value in rewritten {
            target.append(header::WWW_AUTHENTICATE, value);
        }
    }

    target
}

/// Whether a response to `method` with `status` carries a body at all.
fn expects_body(method: &Method, status: StatusCode, content_length: Option<u64>) -> bool {
    *method != Method::HEAD
        && !status.is_informational()
        && status != StatusCode::NO_CONTENT
        && status != StatusCode::NOT_MODIFIED
        && content_length != Some(0)
}

/// Turns the terminal upstream response into the caller's response.
///
/// Headers are copied (challenge realm rewritten when `proxy_host` is given)
/// and the body is streamed through without being buffered. `method` is the
/// caller's request method, which decides whether a body is expected.
pub fn deliver(
    upstream: reqwest::Response,
    method: &Method,
    proxy_host: Option<&str>,
    request_id: &str,
) -> RelayResult<Response<Body>> {
    let status = upstream.status();
    let headers = outbound_headers(upstream.headers(), proxy_host);
    let bodiless = !expects_body(method, status, upstream.content_length());

    let mut builder = Response::builder().status(status);
    if let Some(target) = builder.headers_mut() {
        *target = headers;
    }

    let stream = DeliveryStream::new(upstream.bytes_stream().boxed(), request_id, status, bodiless);
    builder
        .body(Body::from_stream(stream))
        .map_err(|err| RelayError::Response(err.to_string()))
}

/// Upstream body stream that reports how delivery ended.
///
/// Once headers are out nothing can be retried, so a broken upstream read or a
/// caller that hangs up early is only logged.
struct DeliveryStream {
    inner: BoxStream<'static, reqwest::Result<Bytes>>,
    request_id: String,
    status: StatusCode,
    delivered: u64,
    finished: bool,
}

impl DeliveryStream {
    fn new(
        inner: BoxStream<'static, reqwest::Result<Bytes>>,
        request_id: &str,
        status: StatusCode,
        bodiless: bool,
    ) -> Self {
        // A bodiless response may never be polled, so there is nothing to miss.
        Self {
            inner,
            request_id: request_id.to_string(),
            status,
            delivered: 0,
            finished: bodiless,
        }
    }
}

impl Stream for DeliveryStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.delivered += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.finished = true;
                warn!(
                    request_id = %this.request_id,
                    delivered = this.delivered,
                    error = %err,
                    "upstream body failed mid-stream"
                );
                Poll::Ready(Some(Err(std::io::Error::other(err))))
            }
            Poll::Ready(None) => {
                if !this.finished {
                    this.finished = true;
                    debug!(
                        request_id = %this.request_id,
                        status = %this.status,
                        bytes = this.delivered,
                        "response written"
                    );
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for DeliveryStream {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                request_id = %self.request_id,
                delivered = self.delivered,
                "client went away before the response body completed"
            );
        }
    }
}

use std::path::Path;

use rama::http::{Body, Method, body::util::BodyExt};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::error::{RelayError, RelayResult};

/// Inbound request body captured so every upstream attempt can replay it.
///
/// The backing temporary file is removed when this value is dropped, which
/// covers success, error, and cancellation of the relay alike.
#[derive(Debug)]
pub enum RequestBody {
    Empty,
    Spooled(SpooledBody),
}

impl RequestBody {
    /// GET and HEAD never carry a body and skip the spool entirely.
    pub async fn capture(method: &Method, body: Body, dir: Option<&Path>) -> RelayResult<Self> {
        if method == Method::GET || method == Method::HEAD {
            return Ok(Self::Empty);
        }
        SpooledBody::capture(body, dir).await.map(Self::Spooled)
    }

    pub fn len(&self) -> Option<u64> {
        match self {
            Self::Empty => None,
            Self::Spooled(spooled) => Some(spooled.len()),
        }
    }

    /// A fresh reader over the captured bytes, starting from the beginning.
    pub fn replay(&self) -> RelayResult<Option<reqwest::Body>> {
        match self {
            Self::Empty => Ok(None),
            Self::Spooled(spooled) => spooled.replay().map(Some),
        }
    }
}

#[derive(Debug)]
pub struct SpooledBody {
    file: NamedTempFile,
    len: u64,
}

impl SpooledBody {
    pub async fn capture(mut body: Body, dir: Option<&Path>) -> RelayResult<Self> {
        let file = match dir {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
        .map_err(RelayError::Spool)?;

        let mut writer = tokio::fs::File::from_std(file.reopen().map_err(RelayError::Spool)?);
        let mut len = 0u64;
        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(|err| RelayError::InboundBody(err.to_string()))?;
            if let Ok(data) = frame.into_data() {
                writer.write_all(&data).await.map_err(RelayError::Spool)?;
                len += data.len() as u64;
            }
        }
        writer.flush().await.map_err(RelayError::Spool)?;

        debug!(bytes = len, path = %file.path().display(), "request body spooled");
        Ok(Self { file, len })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Every replay opens its own handle, so an earlier attempt that is still
    /// draining cannot move this one's read position.
    pub fn replay(&self) -> RelayResult<reqwest::Body> {
        let handle = self.file.reopen().map_err(RelayError::Spool)?;
        let stream = ReaderStream::new(tokio::fs::File::from_std(handle));
        Ok(reqwest::Body::wrap_stream(stream))
    }
}

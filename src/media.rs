use std::io;

use bytes::Bytes;
use futures::stream::BoxStream;

/// Single-pass byte stream handed from one stage to the next.
///
/// Whoever holds the stream owns the resources behind it (child processes,
/// feeder tasks). Dropping it tears them down.
pub type MediaStream = BoxStream<'static, io::Result<Bytes>>;

/// Failure raised while media bytes are in flight, tagged with the stage that
/// produced it so the pipeline can report the right cause.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("transcoding failed: {0}")]
    Transcoding(String),
}

/// Constructor used to tag errors with the stage that raised them.
pub type StageTag = fn(String) -> StreamError;

impl StreamError {
    /// Recover the stage tag from an I/O error produced by a stage, if any.
    pub fn from_io(error: &io::Error) -> Option<&StreamError> {
        error
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<StreamError>())
    }

    /// Takes the stage tag out of an I/O error, falling back to `untagged`
    /// for errors no stage claimed.
    pub fn classify(error: io::Error, untagged: StageTag) -> StreamError {
        let message = error.to_string();
        match error.into_inner().map(|inner| inner.downcast::<StreamError>()) {
            Some(Ok(stage)) => *stage,
            _ => untagged(message),
        }
    }

    pub fn into_io(self) -> io::Error {
        io::Error::other(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_tag_survives_io_wrapping() {
        let error = StreamError::Transcoding("exit status 1".to_string()).into_io();
        assert!(matches!(
            StreamError::from_io(&error),
            Some(StreamError::Transcoding(message)) if message == "exit status 1"
        ));
    }

    #[test]
    fn plain_io_errors_have_no_stage() {
        let error = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        assert!(StreamError::from_io(&error).is_none());
    }

    #[test]
    fn classify_keeps_tag_or_uses_fallback() {
        let tagged = StreamError::Extraction("gone".to_string()).into_io();
        assert!(matches!(
            StreamError::classify(tagged, StreamError::Transcoding),
            StreamError::Extraction(message) if message == "gone"
        ));

        let untagged = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        assert!(matches!(
            StreamError::classify(untagged, StreamError::Transcoding),
            StreamError::Transcoding(message) if message == "pipe closed"
        ));
    }
}

//! Line-oriented transport: one JSON health event per line.

use fleetscale_health::HealthEventPublisher;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

/// Publish every non-blank line of `reader`. Returns the number of
/// payloads published; stops early if the queue is closed.
///
/// Lines that are not valid UTF-8 are logged and skipped.
pub async fn feed_lines<R>(mut reader: R, publisher: HealthEventPublisher) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut line_no = 0u64;
    let mut published = 0;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        line_no += 1;

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(e) => {
                warn!(line = line_no, error = %e, "skipping health event line: invalid UTF-8");
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }
        if !publisher.publish(line).await {
            warn!("health event queue closed, input abandoned");
            break;
        }
        published += 1;
    }

    debug!(published, "end of health event input");
    Ok(published)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetscale_health::HealthEventQueue;

    #[tokio::test]
    async fn skips_blank_lines_and_closes_queue() {
        let (publisher, mut receiver) = HealthEventQueue::bounded(8);
        let input: &[u8] = b"{\"a\": {}}\n\n   \n{\"b\": {}}\r\n";

        let published = feed_lines(input, publisher).await.unwrap();

        assert_eq!(published, 2);
        assert_eq!(receiver.take().await.as_deref(), Some("{\"a\": {}}"));
        assert_eq!(receiver.take().await.as_deref(), Some("{\"b\": {}}"));
        assert!(receiver.take().await.is_none());
    }

    #[tokio::test]
    async fn stops_when_receiver_is_gone() {
        let (publisher, receiver) = HealthEventQueue::bounded(1);
        drop(receiver);

        let published = feed_lines(&b"one\ntwo\n"[..], publisher).await.unwrap();
        assert_eq!(published, 0);
    }

    #[tokio::test]
    async fn skips_invalid_utf8_lines() {
        let (publisher, mut receiver) = HealthEventQueue::bounded(8);
        let input: &[u8] = b"{\"a\": {}}\n\xff\xfe bad\n{\"b\": {}}";

        let published = feed_lines(input, publisher).await.unwrap();

        assert_eq!(published, 2);
        assert_eq!(receiver.take().await.as_deref(), Some("{\"a\": {}}"));
        assert_eq!(receiver.take().await.as_deref(), Some("{\"b\": {}}"));
        assert!(receiver.take().await.is_none());
    }
}

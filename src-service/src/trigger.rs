//! Trigger phrase matching.
//!
//! Speech recognition happens elsewhere; this module only decides whether a
//! transcript line should fire a trigger and timestamps it when it does.

use blackbox_common::{Clock, TriggerEvent};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Matches transcripts against a set of trigger phrases, ignoring case.
#[derive(Debug, Clone)]
pub struct PhraseMatcher {
    phrases: Vec<String>,
}

impl PhraseMatcher {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases = phrases
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self { phrases }
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// The first configured phrase found in `transcript`.
    pub fn find(&self, transcript: &str) -> Option<&str> {
        let transcript = transcript.to_lowercase();
        self.phrases
            .iter()
            .find(|p| transcript.contains(p.as_str()))
            .map(String::as_str)
    }

    pub fn matches(&self, transcript: &str) -> bool {
        self.find(transcript).is_some()
    }
}

/// Read transcript lines from `reader` and send a trigger for each match.
///
/// The task ends when the reader reaches EOF or the receiver is dropped.
pub fn spawn_line_trigger_source<R>(
    reader: R,
    matcher: PhraseMatcher,
    clock: Arc<dyn Clock>,
    tx: mpsc::Sender<TriggerEvent>,
) -> JoinHandle<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = reader.lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("Transcript input closed");
                    break;
                }
                Err(e) => {
                    warn!("Failed to read transcript line: {}", e);
                    break;
                }
            };

            let text = line.trim();
            let Some(phrase) = matcher.find(text) else {
                continue;
            };

            // Timestamp at recognition, before anything else can delay it
            let event = TriggerEvent::new(clock.now()).with_text(text);
            info!(fired_at = %event.fired_at, phrase, "Trigger phrase recognized");
            if tx.send(event).await.is_err() {
                debug!("Trigger receiver dropped");
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use blackbox_common::naming::parse_stamp;
    use chrono::NaiveDateTime;

    struct FixedClock(NaiveDateTime);

    impl Clock for FixedClock {
        fn now(&self) -> NaiveDateTime {
            self.0
        }
    }

    #[test]
    fn test_phrase_matching() {
        let matcher = PhraseMatcher::new(["Blackbox", "black box", "  ", ""]);
        assert_eq!(matcher.phrases().len(), 2);
        assert!(matcher.matches("hey BLACKBOX, save that"));
        assert_eq!(matcher.find("okay black box"), Some("black box"));
        assert!(!matcher.matches("the box is black"));
        assert!(!PhraseMatcher::new(Vec::<String>::new()).matches("blackbox"));
    }

    #[tokio::test]
    async fn test_line_source_sends_matching_lines() {
        let input: &[u8] = b"nothing here\nBlack box, record this\n\nblackbox again\n";
        let fired_at = parse_stamp("20250803134115").unwrap();
        let (tx, mut rx) = mpsc::channel(8);

        let task = spawn_line_trigger_source(
            input,
            PhraseMatcher::new(["blackbox", "black box"]),
            Arc::new(FixedClock(fired_at)),
            tx,
        );
        task.await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.fired_at, fired_at);
        assert_eq!(first.text.as_deref(), Some("Black box, record this"));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.text.as_deref(), Some("blackbox again"));
        assert!(rx.recv().await.is_none());
    }
}

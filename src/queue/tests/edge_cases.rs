//! Edge case tests for the queue handler

#[cfg(test)]
mod tests {
    use super::super::{broker_with_queue, fast_policy};
    use crate::core::matchers::{equal_to, has_len, present, present_and, satisfies};
    use crate::core::retry::RetryPolicy;
    use crate::queue::codec::{utf8_decoder, utf8_encoder};
    use crate::queue::{Message, QueueError, QueueHandler, SharedQueueHandler};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// Key "k1:first" by "k1"
    fn prefix(text: &String) -> String {
        text.split(':').next().unwrap_or_default().to_string()
    }

    #[test]
    fn test_last_write_wins_per_key() {
        let (_broker, queue, channel) = broker_with_queue();
        let handler = QueueHandler::builder()
            .channel(channel)
            .queue(queue)
            .indexing_by_content(prefix)
            .consuming_by(utf8_decoder())
            .publishing_by(utf8_encoder())
            .prefetch(1)
            .publish_parallelism(1)
            .retry_policy(fast_policy())
            .build()
            .unwrap();

        handler
            .publish_values(vec!["k1:first".to_string(), "k1:second".to_string()])
            .unwrap();
        handler.consume().unwrap();

        let content_is_second = satisfies("content k1:second", |m: &Arc<Message<String>>| {
            m.content == "k1:second"
        });
        handler
            .eventually_message(&"k1".to_string(), &present_and(content_is_second))
            .unwrap();
        assert_eq!(handler.received_messages().len(), 1);
    }

    #[test]
    fn test_eventually_message_times_out_with_absent_value() {
        let (_broker, queue, channel) = broker_with_queue();
        let handler = QueueHandler::builder()
            .channel(channel)
            .queue(queue)
            .indexing_by_content(|s: &String| s.clone())
            .consuming_by(utf8_decoder())
            .publishing_by(utf8_encoder())
            .retry_policy(RetryPolicy::fixed(
                Duration::from_millis(200),
                Duration::from_millis(20),
            ))
            .build()
            .unwrap();
        handler.consume().unwrap();

        let error = handler
            .eventually_message(&"never".to_string(), &present())
            .unwrap_err();
        assert_eq!(error.last_observed, "None");
        assert!(error.elapsed >= Duration::from_millis(200));
        assert!(error.attempts > 1);
    }

    #[test]
    fn test_eventually_received_counts_distinct_keys() {
        let (_broker, queue, channel) = broker_with_queue();
        let handler = QueueHandler::builder()
            .channel(channel)
            .queue(queue)
            .indexing_by_content(prefix)
            .consuming_by(utf8_decoder())
            .publishing_by(utf8_encoder())
            .retry_policy(fast_policy())
            .build()
            .unwrap();
        handler.consume().unwrap();

        handler
            .publish_values(vec![
                "a:1".to_string(),
                "b:1".to_string(),
                "a:2".to_string(),
            ])
            .unwrap();

        let received = handler.eventually_received(&has_len(2)).unwrap();
        assert!(received.contains_key("a"));
        assert!(received.contains_key("b"));
        let b = handler
            .eventually_message(&"b".to_string(), &present())
            .unwrap();
        assert_eq!(b.map(|m| m.content.clone()), Some("b:1".to_string()));
    }

    #[test]
    fn test_stats_follow_deliveries() {
        let (_broker, queue, channel) = broker_with_queue();
        let handler = QueueHandler::builder()
            .channel(channel)
            .queue(queue)
            .indexing_by_content(|s: &String| s.clone())
            .consuming_by(utf8_decoder())
            .publishing_by(utf8_encoder())
            .retry_policy(fast_policy())
            .build()
            .unwrap();
        handler.consume().unwrap();
        handler
            .publish_values((0..4).map(|i| i.to_string()))
            .unwrap();

        crate::core::eventually::eventually(
            || handler.stats().stored,
            &equal_to(4u64),
            &fast_policy(),
        )
        .unwrap();
    }

    #[test]
    fn test_shared_handler_is_built_once() {
        let (_broker, queue, channel) = broker_with_queue();
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);

        let shared = Arc::new(SharedQueueHandler::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            QueueHandler::builder()
                .channel(channel.clone())
                .queue(queue.clone())
                .indexing_by_content(|s: &String| s.clone())
                .consuming_by(utf8_decoder())
                .publishing_by(utf8_encoder())
                .build()
        }));
        assert!(!shared.is_initialised());

        let handlers: Vec<_> = (0..8)
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || shared.get().unwrap())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| t.join().unwrap())
            .collect();

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(handlers.iter().all(|h| Arc::ptr_eq(h, &handlers[0])));
        assert!(shared.is_initialised());
    }

    #[test]
    fn test_shared_handler_retries_failed_build() {
        let (_broker, queue, channel) = broker_with_queue();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let shared = SharedQueueHandler::new(move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            let queue = if attempt == 0 { String::new() } else { queue.clone() };
            QueueHandler::builder()
                .channel(channel.clone())
                .queue(queue)
                .indexing_by_content(|s: &String| s.clone())
                .consuming_by(utf8_decoder())
                .publishing_by(utf8_encoder())
                .build()
        });

        assert!(matches!(
            shared.get(),
            Err(QueueError::Configuration { .. })
        ));
        assert!(shared.get().is_ok());
        assert!(shared.get().is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}

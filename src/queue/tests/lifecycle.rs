//! Tests for QueueHandler construction and lifecycle

#[cfg(test)]
mod tests {
    use super::super::{broker_with_queue, fast_policy, int_key, wait_until};
    use crate::broker::{BrokerChannel, InMemoryChannel};
    use crate::core::config::Settings;
    use crate::queue::codec::{utf8_decoder, utf8_encoder};
    use crate::queue::{
        DecodeFailurePolicy, HandlerState, QueueError, QueueHandler, QueueHandlerBuilder,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use strum::IntoEnumIterator;

    fn complete_builder(channel: Arc<InMemoryChannel>, queue: &str) -> QueueHandlerBuilder<i32, String> {
        QueueHandler::builder()
            .channel(channel)
            .queue(queue)
            .indexing_by(int_key())
            .consuming_by(utf8_decoder())
            .publishing_by(utf8_encoder())
            .retry_policy(fast_policy())
    }

    fn configuration_message(builder: QueueHandlerBuilder<i32, String>) -> String {
        match builder.build() {
            Err(QueueError::Configuration { message }) => message,
            other => panic!("expected configuration error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_builder_requires_every_part() {
        let (_broker, queue, channel) = broker_with_queue();

        let missing_channel = QueueHandler::<i32, String>::builder()
            .queue(queue.as_str())
            .indexing_by(int_key())
            .consuming_by(utf8_decoder())
            .publishing_by(utf8_encoder());
        assert!(configuration_message(missing_channel).contains("channel"));

        let missing_queue = QueueHandler::<i32, String>::builder()
            .channel(channel.clone())
            .indexing_by(int_key())
            .consuming_by(utf8_decoder())
            .publishing_by(utf8_encoder());
        assert!(configuration_message(missing_queue).contains("queue"));

        let missing_key = QueueHandler::<i32, String>::builder()
            .channel(channel.clone())
            .queue(queue.as_str())
            .consuming_by(utf8_decoder())
            .publishing_by(utf8_encoder());
        assert!(configuration_message(missing_key).contains("indexing_by"));

        let missing_decoder = QueueHandler::<i32, String>::builder()
            .channel(channel.clone())
            .queue(queue.as_str())
            .indexing_by(int_key())
            .publishing_by(utf8_encoder());
        assert!(configuration_message(missing_decoder).contains("consuming_by"));

        let missing_encoder = QueueHandler::<i32, String>::builder()
            .channel(channel)
            .queue(queue.as_str())
            .indexing_by(int_key())
            .consuming_by(utf8_decoder());
        assert!(configuration_message(missing_encoder).contains("publishing_by"));
    }

    #[test]
    fn test_builder_rejects_zero_limits() {
        let (_broker, queue, channel) = broker_with_queue();

        let zero_prefetch = complete_builder(channel.clone(), &queue).prefetch(0);
        assert!(configuration_message(zero_prefetch).contains("prefetch"));

        let zero_parallelism = complete_builder(channel, &queue).publish_parallelism(0);
        assert!(configuration_message(zero_parallelism).contains("parallelism"));
    }

    #[test]
    fn test_state_transitions() {
        let (_broker, queue, channel) = broker_with_queue();
        let handler = complete_builder(channel, &queue).build().unwrap();

        assert_eq!(handler.state(), HandlerState::Created);
        handler.consume().unwrap();
        assert_eq!(handler.state(), HandlerState::Consuming);
        handler.cancel().unwrap();
        assert_eq!(handler.state(), HandlerState::Created);
        handler.consume().unwrap();
        handler.close().unwrap();
        assert_eq!(handler.state(), HandlerState::Closed);
    }

    #[test]
    fn test_handler_state_display() {
        let names: Vec<String> = HandlerState::iter().map(|s| s.to_string()).collect();
        assert_eq!(names, vec!["Created", "Consuming", "Closed"]);
    }

    #[test]
    fn test_consume_twice_is_a_subscription_error() {
        let (broker, queue, channel) = broker_with_queue();
        let handler = complete_builder(channel, &queue).build().unwrap();

        handler.consume().unwrap();
        assert!(matches!(
            handler.consume(),
            Err(QueueError::SubscriptionState { .. })
        ));
        assert_eq!(broker.consumer_count(&queue), 1);
    }

    #[test]
    fn test_second_cancel_is_a_subscription_error() {
        let (_broker, queue, channel) = broker_with_queue();
        let handler = complete_builder(channel, &queue).build().unwrap();

        handler.consume().unwrap();
        handler.cancel().unwrap();
        assert!(matches!(
            handler.cancel(),
            Err(QueueError::SubscriptionState { .. })
        ));
    }

    #[test]
    fn test_close_twice_unsubscribes_once() {
        let (broker, queue, channel) = broker_with_queue();
        let handler = complete_builder(channel.clone(), &queue).build().unwrap();

        handler.consume().unwrap();
        handler.close().unwrap();
        handler.close().unwrap();

        assert_eq!(broker.consumer_count(&queue), 0);
        assert!(!channel.is_closed());
    }

    #[test]
    fn test_operations_after_close_are_illegal_but_reads_work() {
        let (_broker, queue, channel) = broker_with_queue();
        let handler = complete_builder(channel, &queue).build().unwrap();

        handler.consume().unwrap();
        handler.publish_values(vec!["3".to_string()]).unwrap();
        wait_until("message indexed", || handler.message(&3).is_some());
        handler.close().unwrap();

        assert!(matches!(handler.consume(), Err(QueueError::IllegalState { .. })));
        assert!(matches!(handler.cancel(), Err(QueueError::IllegalState { .. })));
        assert!(matches!(
            handler.publish_values(vec!["4".to_string()]),
            Err(QueueError::IllegalState { .. })
        ));
        assert_eq!(handler.received_messages().len(), 1);
        assert_eq!(handler.message(&3).unwrap().content, "3");
    }

    #[test]
    fn test_publish_before_consume_is_delivered_later() {
        let (broker, queue, channel) = broker_with_queue();
        let handler = complete_builder(channel, &queue).build().unwrap();

        handler
            .publish_values((0..5).map(|i| i.to_string()))
            .unwrap();
        assert_eq!(broker.queue_depth(&queue), 5);

        handler.consume().unwrap();
        wait_until("all indexed", || handler.store().len() == 5);
    }

    #[test]
    fn test_drop_closes_consumer_but_not_channel() {
        let (broker, queue, channel) = broker_with_queue();
        let handler = complete_builder(channel.clone(), &queue).build().unwrap();
        handler.consume().unwrap();
        assert_eq!(broker.consumer_count(&queue), 1);

        drop(handler);
        assert_eq!(broker.consumer_count(&queue), 0);
        assert!(!channel.is_closed());
        channel
            .send(&queue, b"1".to_vec(), &Default::default())
            .unwrap();
    }

    #[test]
    fn test_settings_are_applied() {
        let (_broker, _queue, channel) = broker_with_queue();
        let settings = Settings::from_toml_str(
            r#"
            [queue]
            name = "orders"
            prefetch = 2
            publish_parallelism = 1
            dead_letter_after = 3

            [retry]
            max_duration_ms = 1500
            delay_ms = 50
            "#,
        )
        .unwrap();
        assert_eq!(
            settings.queue.decode_failure_policy(),
            DecodeFailurePolicy::DeadLetterAfter(3)
        );

        let handler = QueueHandler::<i32, String>::builder()
            .channel(channel)
            .indexing_by(int_key())
            .consuming_by(utf8_decoder())
            .publishing_by(utf8_encoder())
            .settings(&settings)
            .build()
            .unwrap();

        assert_eq!(handler.queue(), "orders");
        assert_eq!(
            handler.retry_policy().max_duration(),
            Duration::from_millis(1500)
        );
    }
}

//! Kafka-backed [`MessageSource`].
//!
//! librdkafka auto-commits, but only offsets the worker has stored through
//! [`MessageSource::acknowledge`], i.e. messages that reached an outcome.
//! Messages read but left unprocessed at shutdown or after a fault are
//! redelivered to the next consumer. A fresh consumer group starts at the
//! latest offset, so history is never replayed.

use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::Message;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use tracing::{debug, info, warn};

use larder_events::{BusError, MessageSource, RawMessage, Topic};

use crate::config::BusConfig;

pub struct KafkaMessageSource {
    config: BusConfig,
    consumer: Option<StreamConsumer>,
}

impl KafkaMessageSource {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            consumer: None,
        }
    }

    fn consumer(&self) -> Result<&StreamConsumer, BusError> {
        self.consumer
            .as_ref()
            .ok_or_else(|| BusError::Client("kafka consumer is not connected".to_string()))
    }
}

/// librdkafka settings for `config`.
pub(crate) fn client_config(config: &BusConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", &config.brokers)
        .set("client.id", &config.client_id)
        .set("group.id", &config.group_id)
        .set("enable.auto.commit", "true")
        .set("enable.auto.offset.store", "false")
        .set("auto.offset.reset", "latest")
        .set("session.timeout.ms", "30000")
        .set("heartbeat.interval.ms", "3000")
        .set("max.poll.interval.ms", "300000");

    let protocol = match (&config.sasl, config.tls) {
        (None, false) => "plaintext",
        (None, true) => "ssl",
        (Some(_), false) => "sasl_plaintext",
        (Some(_), true) => "sasl_ssl",
    };
    client.set("security.protocol", protocol);

    if let Some(sasl) = &config.sasl {
        client
            .set("sasl.mechanism", "PLAIN")
            .set("sasl.username", &sasl.username)
            .set("sasl.password", &sasl.password);
    }

    client
}

fn classify(err: KafkaError) -> BusError {
    match err {
        KafkaError::MessageConsumption(_) | KafkaError::PartitionEOF(_) => {
            BusError::Consumption(err.to_string())
        }
        other => BusError::Client(other.to_string()),
    }
}

#[async_trait]
impl MessageSource for KafkaMessageSource {
    async fn connect(&mut self) -> Result<(), BusError> {
        let consumer: StreamConsumer = client_config(&self.config)
            .create()
            .map_err(|e| BusError::Connection(e.to_string()))?;

        info!(
            brokers = %self.config.brokers,
            client_id = %self.config.client_id,
            group_id = %self.config.group_id,
            sasl = self.config.sasl.is_some(),
            tls = self.config.tls,
            "kafka consumer created"
        );
        self.consumer = Some(consumer);
        Ok(())
    }

    async fn subscribe(&mut self, topics: &[Topic]) -> Result<(), BusError> {
        let names: Vec<&str> = topics.iter().map(|t| t.name()).collect();
        self.consumer()?
            .subscribe(&names)
            .map_err(|e| BusError::Subscription(e.to_string()))?;
        info!(topics = ?names, "kafka subscription established");
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<RawMessage>, BusError> {
        let message = self.consumer()?.recv().await.map_err(classify)?;
        Ok(Some(RawMessage {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        }))
    }

    async fn acknowledge(
        &mut self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<(), BusError> {
        // Kafka commits the next offset to read, not the last one finished.
        self.consumer()?
            .store_offset(topic, partition, offset + 1)
            .map_err(classify)
    }

    async fn close(&mut self) -> Result<(), BusError> {
        let Some(consumer) = self.consumer.take() else {
            return Ok(());
        };

        // Commit while the partitions are still assigned to this member.
        match consumer.commit_consumer_state(CommitMode::Sync) {
            Ok(()) => info!("final offsets committed"),
            // Nothing stored yet means there is nothing to commit.
            Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => {
                debug!("no stored offsets to commit");
            }
            Err(err) => warn!(error = %err, "final offset commit failed"),
        }
        consumer.unsubscribe();
        drop(consumer);
        info!("kafka consumer closed");
        Ok(())
    }
}

impl Drop for KafkaMessageSource {
    fn drop(&mut self) {
        if self.consumer.is_some() {
            warn!("kafka source dropped without close()");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SaslCredentials;

    fn bus(sasl: bool, tls: bool) -> BusConfig {
        BusConfig {
            brokers: "broker-1:9092,broker-2:9092".to_string(),
            sasl: sasl.then(|| SaslCredentials {
                username: "sync".to_string(),
                password: "s3cret".to_string(),
            }),
            client_id: "larder-erp-sync".to_string(),
            group_id: "larder-erp-sync-group".to_string(),
            tls,
        }
    }

    #[test]
    fn security_protocol_follows_sasl_and_tls() {
        let cases = [
            (false, false, "plaintext"),
            (false, true, "ssl"),
            (true, false, "sasl_plaintext"),
            (true, true, "sasl_ssl"),
        ];
        for (sasl, tls, expected) in cases {
            let config = client_config(&bus(sasl, tls));
            assert_eq!(config.get("security.protocol"), Some(expected));
            assert_eq!(config.get("sasl.mechanism").is_some(), sasl);
        }
    }

    #[test]
    fn consumer_starts_at_latest_with_auto_commit() {
        let config = client_config(&bus(true, false));
        assert_eq!(config.get("bootstrap.servers"), Some("broker-1:9092,broker-2:9092"));
        assert_eq!(config.get("group.id"), Some("larder-erp-sync-group"));
        assert_eq!(config.get("auto.offset.reset"), Some("latest"));
        assert_eq!(config.get("enable.auto.commit"), Some("true"));
        assert_eq!(config.get("enable.auto.offset.store"), Some("false"));
        assert_eq!(config.get("sasl.username"), Some("sync"));
    }

    #[test]
    fn fetch_errors_are_recoverable() {
        let fetch = classify(KafkaError::MessageConsumption(
            RDKafkaErrorCode::BrokerTransportFailure,
        ));
        assert!(fetch.is_recoverable());

        let fatal = classify(KafkaError::Subscription("bad topic".to_string()));
        assert!(!fatal.is_recoverable());
    }

    #[tokio::test]
    async fn next_message_requires_connect() {
        let mut source = KafkaMessageSource::new(bus(false, false));
        assert!(matches!(source.next_message().await, Err(BusError::Client(_))));
        assert!(matches!(
            source.acknowledge("stock_updates", 0, 1).await,
            Err(BusError::Client(_))
        ));
        assert!(source.close().await.is_ok());
    }
}

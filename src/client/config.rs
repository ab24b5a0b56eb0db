//! Broker-level settings and rdkafka client configuration assembly.

use envconfig::Envconfig;
use rdkafka::ClientConfig;

use crate::producer::configuration::Acks;

/// Environment-driven broker settings shared by every consumer and producer
/// in the process.
#[derive(Envconfig, Clone)]
pub struct KafkaSettings {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying a produced message

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "60000")]
    pub kafka_session_timeout_ms: u32,

    #[envconfig(default = "5000")]
    pub kafka_heartbeat_interval_ms: u32,

    #[envconfig(default = "earliest")]
    pub kafka_offset_reset: String, // earliest, latest
}

/// rdkafka configuration for a group consumer. Auto commit and auto offset
/// store are always disabled: the worker pool stores offsets explicitly after
/// processing.
pub fn consumer_client_config(settings: &KafkaSettings, group_id: &str) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", &settings.kafka_hosts)
        .set("group.id", group_id)
        .set("enable.auto.offset.store", "false")
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", &settings.kafka_offset_reset)
        .set(
            "session.timeout.ms",
            settings.kafka_session_timeout_ms.to_string(),
        )
        .set(
            "heartbeat.interval.ms",
            settings.kafka_heartbeat_interval_ms.to_string(),
        );
    apply_tls(&mut config, settings);
    config
}

/// rdkafka configuration for a producer.
pub fn producer_client_config(
    settings: &KafkaSettings,
    acks: Acks,
    transactional_id: Option<&str>,
) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", &settings.kafka_hosts)
        .set(
            "linger.ms",
            settings.kafka_producer_linger_ms.to_string(),
        )
        .set(
            "message.timeout.ms",
            settings.kafka_message_timeout_ms.to_string(),
        )
        .set("compression.codec", &settings.kafka_compression_codec)
        .set(
            "acks",
            match acks {
                Acks::None => "0",
                Acks::Leader => "1",
                Acks::All => "all",
            },
        );
    if let Some(id) = transactional_id {
        config.set("transactional.id", id);
    }
    apply_tls(&mut config, settings);
    config
}

fn apply_tls(config: &mut ClientConfig, settings: &KafkaSettings) {
    if settings.kafka_tls {
        config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> KafkaSettings {
        KafkaSettings {
            kafka_hosts: "broker:9092".to_string(),
            kafka_tls: false,
            kafka_producer_linger_ms: 20,
            kafka_message_timeout_ms: 20000,
            kafka_compression_codec: "none".to_string(),
            kafka_session_timeout_ms: 60000,
            kafka_heartbeat_interval_ms: 5000,
            kafka_offset_reset: "earliest".to_string(),
        }
    }

    #[test]
    fn test_consumer_config_disables_auto_commit_and_store() {
        let config = consumer_client_config(&settings(), "group-a");
        assert_eq!(config.get("enable.auto.commit"), Some("false"));
        assert_eq!(config.get("enable.auto.offset.store"), Some("false"));
        assert_eq!(config.get("group.id"), Some("group-a"));
    }

    #[test]
    fn test_producer_config_sets_transactional_id_when_present() {
        let config = producer_client_config(&settings(), Acks::All, Some("txn-1"));
        assert_eq!(config.get("transactional.id"), Some("txn-1"));
        assert_eq!(config.get("acks"), Some("all"));

        let plain = producer_client_config(&settings(), Acks::Leader, None);
        assert_eq!(plain.get("transactional.id"), None);
        assert_eq!(plain.get("acks"), Some("1"));
    }
}

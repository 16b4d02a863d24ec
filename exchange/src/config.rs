use std::net::SocketAddr;
use std::time::Duration;

/// Runtime configuration for the exchange service.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Address the gRPC listener binds.
    pub listen_addr: SocketAddr,
    /// Cadence of the statistics stream.
    pub stats_interval: Duration,
    /// Tickers to broadcast on the statistics stream; empty broadcasts all.
    pub tickers: Vec<String>,
}

impl ExchangeConfig {
    /// Whether bars for `ticker` go out on the statistics stream.
    pub fn broadcasts(&self, ticker: &str) -> bool {
        self.tickers.is_empty() || self.tickers.iter().any(|t| t == ticker)
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([127, 0, 0, 1], 8082).into(),
            stats_interval: Duration::from_secs(1),
            tickers: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_broadcasts_everything() {
        let config = ExchangeConfig::default();
        assert!(config.broadcasts("SPFB.RTS"));
        assert!(config.broadcasts("TEST"));
    }

    #[test]
    fn filter_restricts_to_listed_tickers() {
        let config = ExchangeConfig {
            tickers: vec!["SPFB.RTS".to_string()],
            ..ExchangeConfig::default()
        };
        assert!(config.broadcasts("SPFB.RTS"));
        assert!(!config.broadcasts("TEST"));
    }
}

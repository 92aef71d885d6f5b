/// Resilience patterns shared by every database- and broker-facing call
/// in this workspace.
///
/// - **Circuit Breaker**: fails fast once a downstream's error rate
///   crosses a threshold, instead of piling up blocked callers.
/// - **Retry**: exponential backoff with jitter for transient failures.
/// - **Timeout**: enforces a hard ceiling on any external call.
/// - **Presets**: pre-tuned settings for the two downstreams this system
///   actually has — Postgres and Kafka.
///
/// # Example: publish with a circuit breaker
///
/// ```rust,no_run
/// use resilience::{presets, CircuitBreaker};
///
/// #[tokio::main]
/// async fn main() {
///     let config = presets::kafka_config();
///     let circuit_breaker = CircuitBreaker::new(config.circuit_breaker);
///
///     let result = circuit_breaker.call(|| async {
///         Ok::<_, String>(())
///     }).await;
/// }
/// ```
pub mod circuit_breaker;
pub mod presets;
pub mod retry;
pub mod timeout;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use presets::{database_config, kafka_config, ServiceConfig};
pub use retry::{with_retry, RetryConfig, RetryError};
pub use timeout::{with_timeout, with_timeout_result, TimeoutConfig, TimeoutError};

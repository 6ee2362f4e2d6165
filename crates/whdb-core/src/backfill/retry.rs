use std::time::Duration;

use log::warn;

use crate::errors::Result;

/// Reintentos con backoff lineal para errores transitorios.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Intentos totales (el primero incluido).
    pub max_attempts: u32,
    /// Espera base; el intento `n` espera `n * backoff`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3,
               backoff: Duration::from_millis(250) }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1),
               backoff }
    }

    /// Sin espera entre intentos (tests).
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }
}

/// Ejecuta `f` reintentando mientras el error sea `is_retryable()` y queden
/// intentos.
pub fn with_retry<F, T>(policy: &RetryPolicy, mut f: F) -> Result<T>
    where F: FnMut() -> Result<T>
{
    let mut attempt = 1;
    loop {
        match f() {
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff * attempt;
                warn!("retryable error (attempt {attempt}/{}): {e} -> sleeping {}ms",
                      policy.max_attempts,
                      delay.as_millis());
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                attempt += 1;
            }
            r => return r,
        }
    }
}

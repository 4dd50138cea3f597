use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use portico_config::CircuitBreakerConfig;

use super::Breaker;

/// Process-wide registry of circuit breakers, one per downstream name.
///
/// The registry is parameterized by the payload type its breakers guard, so
/// each (payload type, name) pair names exactly one breaker. Breakers are
/// created on first use and live for the process lifetime; configuration
/// changes require a restart.
///
/// Reads take the reader lock; creation takes the writer lock.
pub struct BreakerRegistry<T> {
    breakers: RwLock<HashMap<String, Arc<Breaker<T>>>>,
}

impl<T> BreakerRegistry<T> {
    pub fn new() -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Return the breaker registered under `name`, creating it with
    /// `config` on first use. The config is ignored when the breaker
    /// already exists.
    pub fn get_or_create(&self, name: &str, config: CircuitBreakerConfig) -> Arc<Breaker<T>> {
        if let Some(breaker) = self.get(name) {
            return breaker;
        }

        let mut breakers = self.breakers.write().expect("breaker registry poisoned");
        // a concurrent caller may have won the race for the write lock
        breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Breaker::new(name, config)))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Breaker<T>>> {
        self.breakers
            .read()
            .expect("breaker registry poisoned")
            .get(name)
            .cloned()
    }

    pub fn remove(&self, name: &str) {
        self.breakers
            .write()
            .expect("breaker registry poisoned")
            .remove(name);
    }

    pub fn names(&self) -> Vec<String> {
        self.breakers
            .read()
            .expect("breaker registry poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.breakers
            .read()
            .expect("breaker registry poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for BreakerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            max_requests: 5,
            interval_secs: 60,
            timeout_secs: 60,
            failure_threshold: 5,
            failure_rate_threshold: 0.6,
            min_requests: 10,
        }
    }

    #[test]
    fn test_same_name_returns_same_breaker() {
        let registry = BreakerRegistry::<u32>::new();

        let first = registry.get_or_create("order", config());
        let second = registry.get_or_create("order", config());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_misses_before_creation() {
        let registry = BreakerRegistry::<u32>::new();
        assert!(registry.get("order").is_none());

        registry.get_or_create("order", config());
        assert!(registry.get("order").is_some());
    }

    #[test]
    fn test_remove_and_list() {
        let registry = BreakerRegistry::<u32>::new();
        registry.get_or_create("order", config());
        registry.get_or_create("auth", config());

        let mut names = registry.names();
        names.sort();
        assert_eq!(names, vec!["auth".to_string(), "order".to_string()]);

        registry.remove("order");
        assert!(registry.get("order").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_get_or_create_is_exactly_once() {
        let registry = Arc::new(BreakerRegistry::<u32>::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.get_or_create("order", config()))
            })
            .collect();

        let breakers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for breaker in &breakers[1..] {
            assert!(Arc::ptr_eq(&breakers[0], breaker));
        }
        assert_eq!(registry.len(), 1);
    }
}

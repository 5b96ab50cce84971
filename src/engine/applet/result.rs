// SPDX-License-Identifier: MIT

//! Per-node outcomes
//!
//! Payload-free outcomes use the `EMPTY_SUCCESS` / `EMPTY_FAILURE` constants and
//! never allocate. Results carrying values take their payload box from a
//! bounded `ResultPool` and give it back through `ResultPool::recycle`.

use super::Value;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Payload {
    returned: Vec<Value>,
    actual: Option<Value>,
    error: Option<String>,
}

impl Payload {
    fn clear(&mut self) {
        self.returned.clear();
        self.actual = None;
        self.error = None;
    }
}

#[derive(Debug)]
pub struct AppletResult {
    successful: bool,
    payload: Option<Box<Payload>>,
}

impl AppletResult {
    pub const EMPTY_SUCCESS: AppletResult = AppletResult {
        successful: true,
        payload: None,
    };

    pub const EMPTY_FAILURE: AppletResult = AppletResult {
        successful: false,
        payload: None,
    };

    pub fn empty(successful: bool) -> Self {
        if successful {
            Self::EMPTY_SUCCESS
        } else {
            Self::EMPTY_FAILURE
        }
    }

    pub fn is_successful(&self) -> bool {
        self.successful
    }

    /// Values available to consumers through referents
    pub fn returned(&self) -> &[Value] {
        self.payload
            .as_ref()
            .map(|p| p.returned.as_slice())
            .unwrap_or(&[])
    }

    /// Diagnostic value observed by a failed criterion or action
    pub fn actual(&self) -> Option<&Value> {
        self.payload.as_ref().and_then(|p| p.actual.as_ref())
    }

    pub fn error(&self) -> Option<&str> {
        self.payload.as_ref().and_then(|p| p.error.as_deref())
    }

    pub fn is_pooled(&self) -> bool {
        self.payload.is_some()
    }
}

/// Bounded free-list of result payloads
pub struct ResultPool {
    free: Mutex<Vec<Box<Payload>>>,
    capacity: usize,
}

impl ResultPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    fn obtain(&self) -> Box<Payload> {
        let mut free = self.free.lock().unwrap_or_else(|p| p.into_inner());
        free.pop().unwrap_or_default()
    }

    pub fn succeeded(&self, returned: Vec<Value>) -> AppletResult {
        if returned.is_empty() {
            return AppletResult::EMPTY_SUCCESS;
        }
        let mut payload = self.obtain();
        payload.returned.extend(returned);
        AppletResult {
            successful: true,
            payload: Some(payload),
        }
    }

    pub fn failed(&self, actual: Option<Value>) -> AppletResult {
        match actual {
            None => AppletResult::EMPTY_FAILURE,
            Some(actual) => {
                let mut payload = self.obtain();
                payload.actual = Some(actual);
                AppletResult {
                    successful: false,
                    payload: Some(payload),
                }
            }
        }
    }

    pub fn error(&self, message: impl Into<String>) -> AppletResult {
        let mut payload = self.obtain();
        payload.error = Some(message.into());
        AppletResult {
            successful: false,
            payload: Some(payload),
        }
    }

    /// Return a result's payload to the free-list; sentinels are ignored
    pub fn recycle(&self, result: AppletResult) {
        if let Some(mut payload) = result.payload {
            payload.clear();
            let mut free = self.free.lock().unwrap_or_else(|p| p.into_inner());
            if free.len() < self.capacity {
                free.push(payload);
            }
        }
    }

    /// Number of payloads waiting for reuse
    pub fn available(&self) -> usize {
        self.free.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn drain(&self) {
        self.free.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_results_do_not_touch_pool() {
        let pool = ResultPool::new(4);
        let ok = pool.succeeded(Vec::new());
        let ko = pool.failed(None);
        assert!(ok.is_successful() && !ok.is_pooled());
        assert!(!ko.is_successful() && !ko.is_pooled());
        pool.recycle(ok);
        pool.recycle(ko);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_recycled_payload_is_cleared() {
        let pool = ResultPool::new(4);
        let failed = pool.failed(Some(Value::from("X")));
        assert_eq!(failed.actual(), Some(&Value::from("X")));
        pool.recycle(failed);
        assert_eq!(pool.available(), 1);

        let ok = pool.succeeded(vec![Value::Int(7)]);
        assert_eq!(pool.available(), 0);
        assert_eq!(ok.returned(), &[Value::Int(7)]);
        assert!(ok.actual().is_none());
        assert!(ok.error().is_none());
    }

    #[test]
    fn test_pool_is_bounded() {
        let pool = ResultPool::new(2);
        let results: Vec<_> = (0..5).map(|i| pool.succeeded(vec![Value::Int(i)])).collect();
        for r in results {
            pool.recycle(r);
        }
        assert_eq!(pool.available(), 2);
        pool.drain();
        assert_eq!(pool.available(), 0);
    }
}

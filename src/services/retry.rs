use reqwest::StatusCode;
use tracing::{info, warn};

use crate::models::diagnosis::Diagnosis;
use crate::services::credentials::CredentialPool;
use crate::services::gemini::{AnalysisError, DiagnosisEngine};

/// What a failed analysis call says about the credential that made it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Quota exhausted (429-class). Expected to self-heal; rotate and retry.
    RateLimited,
    /// Credential revoked or forbidden. Operator-actionable; rotate and retry.
    Revoked,
    /// Anything else. Rotation cannot fix it; fail the job immediately.
    Other,
}

/// Classify a failed call. Pure, so the policy is testable without a
/// real external call.
pub fn classify(err: &AnalysisError) -> FailureClass {
    match err {
        AnalysisError::Status { status, body } => {
            if *status == StatusCode::TOO_MANY_REQUESTS || body.contains("RESOURCE_EXHAUSTED") {
                FailureClass::RateLimited
            } else if *status == StatusCode::UNAUTHORIZED
                || *status == StatusCode::FORBIDDEN
                || body.contains("PERMISSION_DENIED")
                || body.contains("API_KEY_INVALID")
            {
                FailureClass::Revoked
            } else {
                FailureClass::Other
            }
        }
        // Timeouts carry no rate-limit signature; treated as request-level.
        AnalysisError::Http(_) | AnalysisError::Schema(_) | AnalysisError::Empty => {
            FailureClass::Other
        }
    }
}

/// Job-level outcome of the failover loop.
#[derive(Debug, thiserror::Error)]
pub enum DiagnosisError {
    #[error("all credentials exhausted after {attempts} attempts")]
    PoolExhausted { attempts: usize },

    #[error("analysis request failed: {0}")]
    Request(#[from] AnalysisError),
}

/// Bounded rotate-and-retry loop around the analysis client.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: usize,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self { max_attempts }
    }

    /// Default budget: every credential gets roughly two chances, even
    /// under interleaved exhaustion across jobs.
    pub fn for_pool(pool: &CredentialPool) -> Self {
        Self::new(pool.len() * 2)
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Call the engine with the pool's current credential, rotating on
    /// rate-limit or revocation until the budget runs out. `Other`
    /// failures abort immediately with zero further rotations.
    pub async fn diagnose_with_failover(
        &self,
        engine: &dyn DiagnosisEngine,
        pool: &CredentialPool,
        image: &[u8],
    ) -> Result<Diagnosis, DiagnosisError> {
        for attempt in 1..=self.max_attempts {
            let key_index = pool.current_index();
            match engine.diagnose(image, pool.current()).await {
                Ok(diagnosis) => return Ok(diagnosis),
                Err(err) => match classify(&err) {
                    FailureClass::RateLimited => {
                        info!(key_index, attempt, "credential rate-limited, rotating");
                        pool.rotate();
                    }
                    FailureClass::Revoked => {
                        warn!(
                            key_index,
                            attempt, "credential revoked or forbidden, rotating; key needs replacement"
                        );
                        pool.rotate();
                    }
                    FailureClass::Other => {
                        info!(key_index, attempt, error = %err, "non-credential failure, not retrying");
                        return Err(DiagnosisError::Request(err));
                    }
                },
            }
        }

        Err(DiagnosisError::PoolExhausted {
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::models::diagnosis::Severity;
    use crate::services::credentials::ApiKey;

    fn healthy() -> Diagnosis {
        Diagnosis {
            bee_detected: true,
            condition_name: "Healthy colony".into(),
            severity: Severity::Healthy,
            description: "No disease signs.".into(),
            recommended_treatment: vec![],
            preventative_measures: vec![],
        }
    }

    fn rate_limited() -> AnalysisError {
        AnalysisError::Status {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: "RESOURCE_EXHAUSTED".into(),
        }
    }

    fn revoked() -> AnalysisError {
        AnalysisError::Status {
            status: StatusCode::FORBIDDEN,
            body: "PERMISSION_DENIED".into(),
        }
    }

    fn server_error() -> AnalysisError {
        AnalysisError::Status {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: "boom".into(),
        }
    }

    /// Engine that replays a fixed script of outcomes and records which
    /// key served each attempt.
    struct ScriptedEngine {
        script: Mutex<VecDeque<Result<Diagnosis, AnalysisError>>>,
        keys_seen: Mutex<Vec<String>>,
    }

    impl ScriptedEngine {
        fn new(script: Vec<Result<Diagnosis, AnalysisError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                keys_seen: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl DiagnosisEngine for ScriptedEngine {
        async fn diagnose(&self, _image: &[u8], key: &ApiKey) -> Result<Diagnosis, AnalysisError> {
            self.keys_seen.lock().unwrap().push(key.secret().to_string());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .expect("engine called more times than scripted")
        }
    }

    #[test]
    fn classification_is_exhaustive_over_status_codes() {
        assert_eq!(classify(&rate_limited()), FailureClass::RateLimited);
        assert_eq!(classify(&revoked()), FailureClass::Revoked);
        assert_eq!(
            classify(&AnalysisError::Status {
                status: StatusCode::UNAUTHORIZED,
                body: String::new(),
            }),
            FailureClass::Revoked
        );
        assert_eq!(classify(&server_error()), FailureClass::Other);
        assert_eq!(classify(&AnalysisError::Empty), FailureClass::Other);
    }

    #[test]
    fn rate_limit_signature_in_body_counts_without_429() {
        let err = AnalysisError::Status {
            status: StatusCode::OK,
            body: "error RESOURCE_EXHAUSTED for quota metric".into(),
        };
        assert_eq!(classify(&err), FailureClass::RateLimited);
    }

    #[tokio::test]
    async fn every_key_rate_limited_exhausts_pool_after_2k_attempts() {
        let pool = CredentialPool::new(vec!["k1".into(), "k2".into(), "k3".into()]).unwrap();
        let policy = RetryPolicy::for_pool(&pool);
        let engine = ScriptedEngine::new((0..6).map(|_| Err(rate_limited())).collect());

        let result = policy.diagnose_with_failover(&engine, &pool, b"img").await;

        match result {
            Err(DiagnosisError::PoolExhausted { attempts }) => assert_eq!(attempts, 6),
            other => panic!("expected PoolExhausted, got {:?}", other.map(|_| ())),
        }
        assert_eq!(pool.rotations(), 6);
        assert_eq!(pool.current_index(), 0); // 6 mod 3
        assert_eq!(
            engine.keys_seen.lock().unwrap().as_slice(),
            ["k1", "k2", "k3", "k1", "k2", "k3"]
        );
    }

    #[tokio::test]
    async fn revoked_then_success_lands_on_second_key() {
        let pool = CredentialPool::new(vec!["k1".into(), "k2".into()]).unwrap();
        let policy = RetryPolicy::for_pool(&pool);
        let engine = ScriptedEngine::new(vec![Err(revoked()), Ok(healthy())]);

        let diagnosis = policy
            .diagnose_with_failover(&engine, &pool, b"img")
            .await
            .unwrap();

        assert_eq!(diagnosis.condition_name, "Healthy colony");
        assert_eq!(pool.current_index(), 1);
        assert_eq!(pool.rotations(), 1);
    }

    #[tokio::test]
    async fn other_failure_aborts_with_zero_rotations() {
        let pool = CredentialPool::new(vec!["k1".into(), "k2".into()]).unwrap();
        let policy = RetryPolicy::for_pool(&pool);
        let engine = ScriptedEngine::new(vec![Err(server_error())]);

        let result = policy.diagnose_with_failover(&engine, &pool, b"img").await;

        assert!(matches!(result, Err(DiagnosisError::Request(_))));
        assert_eq!(pool.rotations(), 0);
        assert_eq!(engine.keys_seen.lock().unwrap().len(), 1);
    }
}

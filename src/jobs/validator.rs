//! # Job configuration validation.
//!
//! Turns the raw mapping returned by a configuration source into a
//! [`Configuration`] of validated [`JobConfig`]s. Invalid jobs are dropped and
//! reported one [`ValidationError`] each; valid ones get defaults filled in.
//!
//! ```text
//! RawConfiguration ──► ConfigurationValidator::validate_all()
//!                        ├─► Configuration       (applied)
//!                        └─► Vec<ValidationError> (logged, dropped)
//! ```

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{FieldError, FieldErrorKind, ValidationError};
use crate::jobs::job::{Configuration, JobConfig, JobId, WorkerConfig};
use crate::workers::WorkerRegistry;

/// Unvalidated configuration as produced by a configuration source.
pub type RawConfiguration = BTreeMap<JobId, Value>;

const MTIME: &str = "time of last modification, must be a UTC UNIX timestamp";
const NAME: &str = "descriptive job name, must be a string";
const WORKER_CONFIG: &str = "worker-specific configuration, must be an object";
const WORKER_CLASS: &str = "worker class, must be a string naming a registered worker";
const SHORT_RUN: &str = "minimum healthy run time in seconds, must be a non-negative integer";
const SHUTDOWN: &str = "seconds between SIGTERM and SIGKILL, must be a non-negative integer";
const ENTRY: &str = "job configuration, must be an object";

/// Validates job configurations against the set of registered workers.
pub struct ConfigurationValidator<'a> {
    workers: &'a WorkerRegistry,
}

impl<'a> ConfigurationValidator<'a> {
    /// Creates a validator that accepts only `workerClass` values known to `workers`.
    pub fn new(workers: &'a WorkerRegistry) -> Self {
        Self { workers }
    }

    /// Validates every entry, splitting accepted configs from rejections.
    pub fn validate_all(&self, raw: &RawConfiguration) -> (Configuration, Vec<ValidationError>) {
        let mut accepted = Configuration::new();
        let mut rejected = Vec::new();
        for (id, value) in raw {
            match self.validate(id, value) {
                Ok(cfg) => {
                    accepted.insert(id.clone(), cfg);
                }
                Err(e) => rejected.push(e),
            }
        }
        (accepted, rejected)
    }

    /// Validates one job entry.
    pub fn validate(&self, id: &JobId, value: &Value) -> Result<JobConfig, ValidationError> {
        let Some(obj) = value.as_object() else {
            return Err(ValidationError {
                job: id.to_string(),
                fields: vec![FieldError {
                    field: "job",
                    kind: FieldErrorKind::Invalid,
                    description: ENTRY,
                }],
            });
        };

        let mut errors = Vec::new();

        let mtime = required(obj, "mtime", MTIME, &mut errors, Value::as_u64);
        let name = required(obj, "name", NAME, &mut errors, |v| {
            v.as_str().map(str::to_string)
        });
        let worker_class = required(obj, "workerClass", WORKER_CLASS, &mut errors, |v| {
            v.as_str()
                .filter(|class| self.workers.contains(class))
                .map(str::to_string)
        });
        let worker_config = optional(obj, "workerConfig", WORKER_CONFIG, &mut errors, |v| {
            v.as_object().cloned()
        })
        .unwrap_or_else(WorkerConfig::new);
        let short_run = optional(obj, "shortRunTimeSeconds", SHORT_RUN, &mut errors, Value::as_u64)
            .unwrap_or(JobConfig::DEFAULT_SHORT_RUN_TIME_SECONDS);
        let shutdown = optional(obj, "shutdownTimeoutSeconds", SHUTDOWN, &mut errors, Value::as_u64)
            .unwrap_or(JobConfig::DEFAULT_SHUTDOWN_TIMEOUT_SECONDS);

        match (mtime, name, worker_class) {
            (Some(mtime), Some(name), Some(worker_class)) if errors.is_empty() => Ok(JobConfig {
                name,
                worker_class,
                worker_config,
                mtime,
                short_run_time_seconds: short_run,
                shutdown_timeout_seconds: shutdown,
            }),
            _ => Err(ValidationError {
                job: id.to_string(),
                fields: errors,
            }),
        }
    }
}

fn required<T>(
    obj: &serde_json::Map<String, Value>,
    field: &'static str,
    description: &'static str,
    errors: &mut Vec<FieldError>,
    extract: impl FnOnce(&Value) -> Option<T>,
) -> Option<T> {
    match obj.get(field) {
        None | Some(Value::Null) => {
            errors.push(FieldError {
                field,
                kind: FieldErrorKind::Missing,
                description,
            });
            None
        }
        Some(v) => check(v, field, description, errors, extract),
    }
}

fn optional<T>(
    obj: &serde_json::Map<String, Value>,
    field: &'static str,
    description: &'static str,
    errors: &mut Vec<FieldError>,
    extract: impl FnOnce(&Value) -> Option<T>,
) -> Option<T> {
    match obj.get(field) {
        None | Some(Value::Null) => None,
        Some(v) => check(v, field, description, errors, extract),
    }
}

fn check<T>(
    v: &Value,
    field: &'static str,
    description: &'static str,
    errors: &mut Vec<FieldError>,
    extract: impl FnOnce(&Value) -> Option<T>,
) -> Option<T> {
    let out = extract(v);
    if out.is_none() {
        errors.push(FieldError {
            field,
            kind: FieldErrorKind::Invalid,
            description,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::MockWorker;
    use serde_json::json;

    fn registry() -> WorkerRegistry {
        let mut r = WorkerRegistry::new();
        r.register("mock", MockWorker::factory);
        r
    }

    #[test]
    fn test_fills_defaults() {
        let workers = registry();
        let v = ConfigurationValidator::new(&workers);
        let cfg = v
            .validate(
                &JobId::from(7),
                &json!({"name": "seven", "workerClass": "mock", "mtime": 100}),
            )
            .unwrap();
        assert_eq!(cfg.short_run_time_seconds, 5);
        assert_eq!(cfg.shutdown_timeout_seconds, 10);
        assert!(cfg.worker_config.is_empty());
    }

    #[test]
    fn test_keeps_explicit_values() {
        let workers = registry();
        let v = ConfigurationValidator::new(&workers);
        let cfg = v
            .validate(
                &JobId::from(7),
                &json!({
                    "name": "seven",
                    "workerClass": "mock",
                    "mtime": 100,
                    "workerConfig": {"queue": "emails"},
                    "shortRunTimeSeconds": 30,
                    "shutdownTimeoutSeconds": 0
                }),
            )
            .unwrap();
        assert_eq!(cfg.short_run_time_seconds, 30);
        assert_eq!(cfg.shutdown_timeout_seconds, 0);
        assert_eq!(cfg.worker_config["queue"], "emails");
    }

    #[test]
    fn test_reports_every_bad_field() {
        let workers = registry();
        let v = ConfigurationValidator::new(&workers);
        let err = v
            .validate(
                &JobId::from(7),
                &json!({"workerClass": "nope", "mtime": -3, "workerConfig": [1, 2]}),
            )
            .unwrap_err();
        assert!(err.has_field("name"));
        assert!(err.has_field("workerClass"));
        assert!(err.has_field("mtime"));
        assert!(err.has_field("workerConfig"));
        let name = err.fields.iter().find(|f| f.field == "name").unwrap();
        assert_eq!(name.kind, FieldErrorKind::Missing);
    }

    #[test]
    fn test_rejects_non_object_entry() {
        let workers = registry();
        let v = ConfigurationValidator::new(&workers);
        let err = v.validate(&JobId::from(1), &json!("oops")).unwrap_err();
        assert!(err.has_field("job"));
    }

    #[test]
    fn test_validate_all_drops_only_invalid_jobs() {
        let workers = registry();
        let v = ConfigurationValidator::new(&workers);
        let mut raw = RawConfiguration::new();
        raw.insert(
            JobId::from(1),
            json!({"name": "one", "workerClass": "mock", "mtime": 1}),
        );
        raw.insert(JobId::from(2), json!({"name": "two", "mtime": 1}));
        let (ok, bad) = v.validate_all(&raw);
        assert_eq!(ok.len(), 1);
        assert!(ok.contains_key(&JobId::from(1)));
        assert_eq!(bad.len(), 1);
        assert_eq!(bad[0].job, "2");
    }
}

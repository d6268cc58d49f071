//! Built-in demo handlers.
//!
//! Shared by the `jobsys-worker` binary, the `jobsys` CLI and the test
//! suites so the scheduling side and every worker agree on the same ids.

use std::time::Duration;

use anyhow::bail;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Transferable;
use crate::registry::{Invocation, Job, Registry};

#[derive(Debug, Deserialize)]
pub struct MultiplyArgs {
    pub a: i64,
    pub b: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct FailArgs {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SleepArgs {
    pub ms: u64,
    /// Returned after sleeping, defaults to `ms`.
    #[serde(default)]
    pub value: Option<Value>,
}

/// Naive recursive Fibonacci: a CPU-bound stateful job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fibonacci {
    pub n: u32,
}

impl Fibonacci {
    fn compute(n: u32) -> u64 {
        match n {
            0 => 0,
            1 => 1,
            _ => Self::compute(n - 1) + Self::compute(n - 2),
        }
    }
}

impl Job for Fibonacci {
    const NAME: &'static str = "fibonacci";
    type Output = u64;

    fn execute(self, _transfer: Vec<Transferable>) -> anyhow::Result<u64> {
        if self.n > 90 {
            bail!("fibonacci({}) overflows u64", self.n);
        }
        Ok(Self::compute(self.n))
    }
}

pub fn registry() -> Registry {
    Registry::new()
        .with_fn("multiply", |args: MultiplyArgs| {
            args.a
                .checked_mul(args.b)
                .ok_or_else(|| anyhow::anyhow!("{} * {} overflows", args.a, args.b))
        })
        .with_raw("echo", |inv: Invocation| Ok(inv.payload))
        .with_fn("fail", |args: Option<FailArgs>| -> anyhow::Result<()> {
            let message = args
                .and_then(|a| a.message)
                .unwrap_or_else(|| "Fail".to_string());
            bail!(message)
        })
        .with_fn("panic", |(): ()| -> anyhow::Result<()> {
            panic!("handler panicked on purpose")
        })
        .with_fn("sleep", |args: SleepArgs| {
            std::thread::sleep(Duration::from_millis(args.ms));
            Ok(args.value.unwrap_or_else(|| Value::from(args.ms)))
        })
        .with_raw("checksum", |inv: Invocation| {
            let sum: u64 = inv
                .transfer
                .iter()
                .flat_map(|t| t.as_slice().iter())
                .map(|&b| u64::from(b))
                .sum();
            Ok(Value::from(sum))
        })
        .with_fn("pid", |(): ()| Ok(std::process::id()))
        // Only meaningful in process workers: takes the whole worker down.
        .with_fn("exit_process", |code: Option<i32>| -> anyhow::Result<()> {
            std::process::exit(code.unwrap_or(3))
        })
        .with_job::<Fibonacci>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use serde_json::json;
    use std::sync::Arc;

    fn exec() -> Executor {
        Executor::new(Arc::new(registry()))
    }

    #[test]
    fn multiply_matches_reference_case() {
        let out = exec().invoke("multiply", json!({"a": 3, "b": 20}), Vec::new());
        assert_eq!(out, Ok(json!(60)));
    }

    #[test]
    fn fail_defaults_to_fail_message() {
        let err = exec().invoke("fail", Value::Null, Vec::new()).unwrap_err();
        assert_eq!(err.message, "Fail");

        let err = exec()
            .invoke("fail", json!({"message": "custom"}), Vec::new())
            .unwrap_err();
        assert_eq!(err.message, "custom");
    }

    #[test]
    fn checksum_reads_transfers() {
        let out = exec().invoke(
            "checksum",
            Value::Null,
            vec![Transferable::new(vec![1, 2]), Transferable::new(vec![3])],
        );
        assert_eq!(out, Ok(json!(6)));
    }

    #[test]
    fn fibonacci_job() {
        let payload = serde_json::to_value(Fibonacci { n: 20 }).unwrap();
        assert_eq!(exec().invoke("fibonacci", payload, Vec::new()), Ok(json!(6765)));

        let payload = serde_json::to_value(Fibonacci { n: 91 }).unwrap();
        assert!(exec().invoke("fibonacci", payload, Vec::new()).is_err());
    }
}

//! Restricted snippet interpreter backing the default isolation runtime.
//!
//! Snippets are a JavaScript-like subset evaluated by a tree walker that
//! shares nothing with the host: free identifiers resolve against the
//! policy's grants, `eval`/`Function` and prototype access halt the run,
//! and every step is metered against the deadline and memory budget.

mod interpreter;
mod lexer;
mod parser;
mod value;

pub use interpreter::{Grants, Limits, SECURITY_ERROR};

use crate::sandbox::execution::{FailureKind, RawExecutionOutcome, SUCCESS_MARKER};
use crate::sandbox::policy::SecurityPolicy;

use interpreter::{Abort, Interpreter};
use value::{error_parts, Value};

/// Parse failure, reported as a runtime error of the run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("SyntaxError: {message} (line {line})")]
pub struct SyntaxError {
    pub line: u32,
    pub message: String,
}

impl SyntaxError {
    pub fn new(line: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl Grants {
    /// Capabilities the policy both lists and backs with its I/O flags.
    pub fn from_policy(policy: &SecurityPolicy) -> Self {
        Self {
            policy: policy.name.clone(),
            capabilities: policy
                .allowed_capabilities
                .iter()
                .filter(|c| policy.permits(c))
                .map(|c| c.name().to_string())
                .collect(),
        }
    }
}

/// Run `source` to completion inside the calling thread.
///
/// Never panics on hostile input; every failure is folded into the
/// returned outcome.
pub fn execute(source: &str, grants: &Grants, limits: &Limits) -> RawExecutionOutcome {
    let program = match lexer::tokenize(source).and_then(parser::parse) {
        Ok(program) => program,
        Err(e) => return RawExecutionOutcome::failed(FailureKind::RuntimeError, e.to_string()),
    };

    let mut interp = Interpreter::new(grants, limits);
    let result = match interp.charge_retained(source.len() as u64) {
        Ok(()) => interp.run(&program),
        Err(abort) => Err(abort),
    };

    let mut outcome = match result {
        Ok(Some(value)) if !matches!(value, Value::Undefined) => match value.render() {
            Ok(text) => RawExecutionOutcome::completed(text),
            Err(e) => RawExecutionOutcome::failed(FailureKind::RuntimeError, format!("TypeError: {e}")),
        },
        Ok(_) => RawExecutionOutcome::completed(SUCCESS_MARKER),
        Err(Abort::Throw(value)) => uncaught(&value),
        Err(Abort::Halt { kind, message }) => RawExecutionOutcome::failed(kind, message),
    };
    outcome.memory_used_bytes = interp.peak_memory();
    outcome.violations = interp.take_violations();
    outcome.logs = interp.take_logs();
    outcome
}

fn uncaught(value: &Value) -> RawExecutionOutcome {
    if let Value::Object(props) = value {
        if let Some((name, message)) = error_parts(&props.borrow()) {
            let kind = if name == SECURITY_ERROR {
                FailureKind::CapabilityViolation
            } else {
                FailureKind::RuntimeError
            };
            return RawExecutionOutcome::failed(kind, format!("{name}: {message}"));
        }
    }
    RawExecutionOutcome::failed(
        FailureKind::RuntimeError,
        format!("Uncaught {}", value.to_display()),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::sandbox::execution::ViolationKind;

    fn run_with(source: &str, policy: &SecurityPolicy) -> RawExecutionOutcome {
        let grants = Grants::from_policy(policy);
        let limits = Limits::new(
            policy.memory_limit_bytes,
            policy.execution_timeout(),
            Arc::new(AtomicBool::new(false)),
        );
        execute(source, &grants, &limits)
    }

    fn run(source: &str) -> RawExecutionOutcome {
        run_with(source, &SecurityPolicy::sandbox())
    }

    fn output(source: &str) -> String {
        let outcome = run(source);
        assert!(outcome.is_success(), "{source}: {:?}", outcome.failure);
        outcome.output.unwrap()
    }

    #[test]
    fn test_arithmetic_and_return() {
        assert_eq!(output("return 1+1"), "2");
        assert_eq!(output("return 7 % 3 * 2 - 1"), "1");
        assert_eq!(output("return 1 / 4"), "0.25");
        assert_eq!(output("return 'a' + 1"), "a1");
    }

    #[test]
    fn test_no_return_reports_marker() {
        assert_eq!(output("let x = 1;"), SUCCESS_MARKER);
        assert_eq!(output(""), SUCCESS_MARKER);
        assert_eq!(output("return"), SUCCESS_MARKER);
    }

    #[test]
    fn test_containers_render_as_json() {
        assert_eq!(output("return [1, 'two', null]"), r#"[1,"two",null]"#);
        assert_eq!(output("return {a: 1, b: [true]}"), r#"{"a":1,"b":[true]}"#);
    }

    #[test]
    fn test_functions_and_closures() {
        let src = r#"
            function counter() {
                let n = 0;
                return function () { n += 1; return n; };
            }
            const next = counter();
            next(); next();
            return next();
        "#;
        assert_eq!(output(src), "3");
    }

    #[test]
    fn test_hoisting_and_recursion() {
        let src = "return fib(10); function fib(n) { return n < 2 ? n : fib(n - 1) + fib(n - 2); }";
        assert_eq!(output(src), "55");
    }

    #[test]
    fn test_loops() {
        let src = r#"
            let total = 0;
            for (let i = 0; i < 10; i++) {
                if (i % 2 == 0) continue;
                total += i;
            }
            for (const x of [1, 2, 3]) { total = total + x; }
            let k = 0;
            while (true) { k++; if (k > 4) break; }
            return total + k;
        "#;
        assert_eq!(output(src), "36");
    }

    #[test]
    fn test_try_catch_finally() {
        let src = r#"
            let trail = [];
            try {
                throw new TypeError('bad input');
            } catch (e) {
                trail.push(e.name + ':' + e.message);
            } finally {
                trail.push('done');
            }
            return trail.join('|');
        "#;
        assert_eq!(output(src), "TypeError:bad input|done");
    }

    #[test]
    fn test_uncaught_error_is_runtime_error() {
        let outcome = run("throw new Error('boom')");
        assert_eq!(outcome.failure_kind(), Some(FailureKind::RuntimeError));
        assert_eq!(outcome.failure.unwrap().message, "Error: boom");

        let outcome = run("throw 42");
        assert_eq!(outcome.failure.unwrap().message, "Uncaught 42");
    }

    #[test]
    fn test_reference_errors() {
        let outcome = run("return missing + 1");
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::CapabilityViolation);

        let outcome = run("undeclared = 3");
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::RuntimeError);
        assert!(failure.message.starts_with("ReferenceError"));

        let outcome = run("const c = 1; c = 2;");
        assert!(outcome.failure.unwrap().message.contains("constant"));
    }

    #[test]
    fn test_syntax_error() {
        let outcome = run("return (1 +");
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::RuntimeError);
        assert!(failure.message.starts_with("SyntaxError"));
    }

    #[test]
    fn test_granted_capabilities() {
        assert_eq!(output("return Math.max(1, 9, 4)"), "9");
        assert_eq!(output("return JSON.stringify({a: [1, 2]})"), r#"{"a":[1,2]}"#);
        assert_eq!(output("return JSON.parse('{\"k\": 5}').k"), "5");
        assert_eq!(output("return typeof Date.now()"), "number");
    }

    #[test]
    fn test_console_is_captured() {
        let outcome = run("console.log('hello', 1); console.warn('careful')");
        assert!(outcome.is_success());
        assert_eq!(outcome.logs, vec!["hello 1", "[warn] careful"]);
    }

    #[test]
    fn test_denied_capability_is_violation() {
        let outcome = run_with("return JSON.stringify(1)", &SecurityPolicy::isolated());
        assert_eq!(outcome.failure_kind(), Some(FailureKind::CapabilityViolation));
        assert_eq!(outcome.violations.len(), 1);
        assert_eq!(outcome.violations[0].kind, ViolationKind::CapabilityViolation);
        assert!(outcome.violations[0].message.contains("'JSON'"));
        assert!(outcome.violations[0].message.contains("'isolated'"));
    }

    #[test]
    fn test_caught_violation_is_still_recorded() {
        let src = "try { fetch('http://x'); } catch (e) { return e.name; }";
        let outcome = run(src);
        assert!(outcome.is_success());
        assert_eq!(outcome.output.as_deref(), Some("SecurityError"));
        assert_eq!(outcome.violations.len(), 1);
    }

    #[test]
    fn test_repeated_violation_is_recorded_once() {
        let src = "for (let i = 0; i < 3; i++) { try { fetch(); } catch (e) {} }";
        let outcome = run(src);
        assert_eq!(outcome.violations.len(), 1);
    }

    #[test]
    fn test_granted_network_capability_has_no_io() {
        let outcome = run_with("return fetch('http://x')", &SecurityPolicy::monitored());
        assert_eq!(outcome.failure_kind(), Some(FailureKind::RuntimeError));
        assert!(outcome.violations.is_empty());
    }

    #[test]
    fn test_dynamic_code_halts() {
        for src in [
            "return eval('1')",
            "return new Function('return 1')()",
            "return [].constructor",
            "try { eval('1') } catch (e) { return 'caught' }",
        ] {
            let outcome = run(src);
            assert_eq!(outcome.failure_kind(), Some(FailureKind::DynamicCode), "{src}");
            assert_eq!(outcome.violations[0].kind, ViolationKind::DynamicCode);
        }
    }

    #[test]
    fn test_memory_limit() {
        let mut policy = SecurityPolicy::sandbox();
        policy.memory_limit_bytes = 64 * 1024;
        let src = "let s = 'x'; while (true) { s = s + s; }";
        let outcome = run_with(src, &policy);
        assert_eq!(outcome.failure_kind(), Some(FailureKind::MemoryLimitExceeded));
        assert_eq!(outcome.violations[0].kind, ViolationKind::MemoryLimitExceeded);
        assert!(outcome.memory_used_bytes > policy.memory_limit_bytes);
    }

    #[test]
    fn test_short_lived_values_do_not_exhaust_memory() {
        let policy = SecurityPolicy::sandbox();
        let src = "let base = '';
            for (let i = 0; i < 1000; i++) { base = base + 'x'; }
            for (let i = 0; i < 60000; i++) { let t = base + i; }
            return 'done'";
        let outcome = run_with(src, &policy);
        assert!(outcome.is_success(), "{:?}", outcome.failure);
        assert_eq!(outcome.output.as_deref(), Some("done"));
        assert!(outcome.violations.is_empty());
        assert!(outcome.memory_used_bytes < policy.memory_limit_bytes / 10);
    }

    #[test]
    fn test_growing_live_data_still_exhausts_memory() {
        let mut policy = SecurityPolicy::sandbox();
        policy.memory_limit_bytes = 256 * 1024;
        let src = "let base = '';
            for (let i = 0; i < 1000; i++) { base = base + 'x'; }
            let kept = [];
            while (true) { kept.push(base + kept.length); }";
        let outcome = run_with(src, &policy);
        assert_eq!(outcome.failure_kind(), Some(FailureKind::MemoryLimitExceeded));
        assert!(outcome.memory_used_bytes > policy.memory_limit_bytes);
    }

    #[test]
    fn test_deadline() {
        let mut policy = SecurityPolicy::sandbox();
        policy.execution_timeout_ms = 50;
        let outcome = run_with("while (true) {}", &policy);
        assert_eq!(outcome.failure_kind(), Some(FailureKind::ExecutionTimeout));
        assert_eq!(outcome.violations, vec![crate::sandbox::execution::SecurityViolation::timeout()]);
    }

    #[test]
    fn test_cancellation_flag() {
        let policy = SecurityPolicy::sandbox();
        let grants = Grants::from_policy(&policy);
        let limits = Limits::new(
            policy.memory_limit_bytes,
            Duration::from_secs(5),
            Arc::new(AtomicBool::new(true)),
        );
        let outcome = execute("while (true) {}", &grants, &limits);
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Cancelled));
    }

    #[test]
    fn test_runaway_recursion_is_range_error() {
        let outcome = run("function f(n) { return f(n + 1); } return f(0);");
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::RuntimeError);
        assert!(failure.message.starts_with("RangeError"));
    }

    #[test]
    fn test_string_and_array_methods() {
        assert_eq!(output("return 'a,b,c'.split(',').length"), "3");
        assert_eq!(output("return ' Hi '.trim().toUpperCase()"), "HI");
        assert_eq!(output("return [3, 1, 2].indexOf(2)"), "2");
        assert_eq!(output("return (2.345).toFixed(1)"), "2.3");
        assert_eq!(output("return 'hello'.slice(1, -1)"), "ell");
    }
}

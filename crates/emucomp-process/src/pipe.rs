//! Two runners wired stdout-to-stdin, started and stopped as a unit.

use crate::error::{ProcessError, Result};
use crate::runner::{ExecResult, ProcessRunner};
use std::process::Stdio;

/// `producer | consumer`.
///
/// The consumer's output is what [`execute_with_result`](Self::execute_with_result)
/// reports; the producer's stdout is never captured because the consumer reads it.
pub struct PipedRunner {
    producer: ProcessRunner,
    consumer: ProcessRunner,
}

impl ProcessRunner {
    /// Wire `producer`'s stdout into `consumer`'s stdin.
    pub fn pipe(producer: ProcessRunner, consumer: ProcessRunner) -> PipedRunner {
        PipedRunner { producer, consumer }
    }
}

impl PipedRunner {
    /// The upstream process.
    pub fn producer(&self) -> &ProcessRunner {
        &self.producer
    }

    /// The downstream process.
    pub fn consumer(&self) -> &ProcessRunner {
        &self.consumer
    }

    fn spawn(&mut self, capture: bool) -> Result<()> {
        let stdout = self
            .producer
            .spawn(true, true)?
            .ok_or_else(|| ProcessError::Pipe("producer has no stdout".into()))?;

        let stdin: Stdio = match stdout.try_into() {
            Ok(stdin) => stdin,
            Err(e) => {
                self.producer.cleanup();
                return Err(ProcessError::Pipe(format!("cannot hand over stdout: {e}")));
            }
        };

        self.consumer.set_stdin(stdin);
        if let Err(e) = self.consumer.spawn(capture, false) {
            self.producer.cleanup();
            return Err(e);
        }

        tracing::debug!(
            producer = %self.producer.command_line(),
            consumer = %self.consumer.command_line(),
            "Started pipe"
        );
        Ok(())
    }

    /// Start both processes.
    ///
    /// With `blocking` the call waits for both to exit and reports whether
    /// both exited with code 0. Failures are logged, never propagated.
    pub async fn start(&mut self, blocking: bool) -> bool {
        if let Err(e) = self.spawn(true) {
            tracing::warn!(error = %e, "Starting pipe failed");
            return false;
        }

        if !blocking {
            return true;
        }

        match self.wait().await {
            Ok(code) => code == 0 && self.producer.exit_code() == Some(0),
            Err(e) => {
                tracing::warn!(error = %e, "Waiting for pipe failed");
                false
            }
        }
    }

    /// Wait for both processes and return the consumer's exit code.
    pub async fn wait(&mut self) -> Result<i32> {
        let consumer = self.consumer.wait().await;
        let producer = self.producer.wait().await;
        if let Err(e) = producer {
            tracing::debug!(error = %e, "Producer wait failed");
        }
        consumer
    }

    /// Run both to completion and report success.
    pub async fn execute(&mut self) -> bool {
        self.start(true).await
    }

    /// Run both to completion and return the consumer's result.
    pub async fn execute_with_result(&mut self, capture: bool) -> Result<ExecResult> {
        self.spawn(capture)?;
        let exit_code = self.wait().await?;
        Ok(self.consumer.result(exit_code))
    }

    /// Stop the producer first so the consumer sees EOF, then the consumer.
    pub async fn stop(&mut self) -> Result<()> {
        let producer = self.producer.stop().await;
        let consumer = self.consumer.stop().await;
        combine("stop", producer, consumer)
    }

    /// Kill both processes.
    pub async fn kill(&mut self) -> Result<()> {
        let producer = self.producer.kill().await;
        let consumer = self.consumer.kill().await;
        combine("kill", producer, consumer)
    }

    /// Log captured output of both processes.
    pub fn print_output(&self) {
        self.producer.print_stderr();
        self.consumer.print_stdout();
        self.consumer.print_stderr();
    }

    /// Release everything held by both runners.
    pub fn cleanup(&mut self) {
        self.producer.cleanup();
        self.consumer.cleanup();
    }
}

/// First error wins; a consumer error hidden behind a producer error is logged.
fn combine(action: &'static str, producer: Result<()>, consumer: Result<()>) -> Result<()> {
    if let (Err(_), Err(e)) = (&producer, &consumer) {
        tracing::warn!(action, error = %e, "Consumer failed as well");
    }
    producer.and(consumer)
}

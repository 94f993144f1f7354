//! Single-attempt command execution on a leased connection.

use tokio::time;

use crate::executor::outcome::{FailureCause, OperationOutcome, Value};
use crate::executor::request::OperationRequest;
use crate::pool::{HealthState, Lease};
use crate::store::{Command, Reply};

/// Run one command on a leased connection and classify the result.
///
/// Never retries. Marks the lease Degraded after a timeout and Dead after an
/// error that leaves the connection unusable (I/O, protocol violation).
pub async fn execute(lease: &mut Lease, request: &OperationRequest) -> OperationOutcome {
    let budget = lease.deadline().clip(request.timeout);
    if budget.is_zero() {
        return OperationOutcome::Timeout {
            outcome_unknown: false,
        };
    }

    let Some(conn) = lease.connection_mut() else {
        return OperationOutcome::PermanentFailure(FailureCause::PoolClosed);
    };
    let connection_id = conn.id();

    let result = time::timeout(budget, conn.execute(&request.command)).await;
    let outcome = match result {
        Err(_) => {
            lease.mark(HealthState::Degraded);
            tracing::debug!(
                connection_id = %connection_id,
                command = %request.kind(),
                budget_ms = budget.as_millis() as u64,
                "Store call timed out"
            );
            OperationOutcome::Timeout {
                outcome_unknown: !request.idempotent,
            }
        }
        Ok(Err(err)) => {
            if err.breaks_connection() {
                lease.mark(HealthState::Dead);
            }
            tracing::debug!(
                connection_id = %connection_id,
                command = %request.kind(),
                error = %err,
                "Store call failed"
            );
            OperationOutcome::from_store_error(&err, request.idempotent)
        }
        Ok(Ok(reply)) => decode(&request.command, reply),
    };

    if let OperationOutcome::PermanentFailure(FailureCause::Protocol(_)) = &outcome {
        lease.mark(HealthState::Dead);
    }
    outcome
}

/// Interpret a raw reply for the command that produced it.
pub(crate) fn decode(command: &Command, reply: Reply) -> OperationOutcome {
    match (command, reply) {
        (Command::Get { .. }, Reply::Nil) => OperationOutcome::NotFound,
        (Command::Get { .. }, Reply::Bulk(bytes)) => match String::from_utf8(bytes) {
            Ok(text) => OperationOutcome::Success(Value::Text(text)),
            Err(e) => OperationOutcome::PermanentFailure(FailureCause::Decode(e.to_string())),
        },
        (Command::Set { .. }, Reply::Ok) => OperationOutcome::Success(Value::Unit),
        (Command::Set { .. }, Reply::Status(status)) if status.eq_ignore_ascii_case("OK") => {
            OperationOutcome::Success(Value::Unit)
        }
        (Command::Delete { .. }, Reply::Integer(0)) => OperationOutcome::NotFound,
        (Command::Delete { .. }, Reply::Integer(n)) if n > 0 => {
            OperationOutcome::Success(Value::Integer(n))
        }
        (Command::Exists { .. }, Reply::Integer(n)) if n >= 0 => {
            OperationOutcome::Success(Value::Bool(n > 0))
        }
        (Command::Increment { .. }, Reply::Integer(n)) => OperationOutcome::Success(Value::Integer(n)),
        (Command::Expire { .. }, Reply::Integer(1)) => OperationOutcome::Success(Value::Bool(true)),
        (Command::Expire { .. }, Reply::Integer(0)) => OperationOutcome::NotFound,
        (Command::Ping, Reply::Status(status)) if status.eq_ignore_ascii_case("PONG") => {
            OperationOutcome::Success(Value::Unit)
        }
        (command, reply) => OperationOutcome::PermanentFailure(FailureCause::Protocol(format!(
            "unexpected reply to {}: {:?}",
            command.kind(),
            reply
        ))),
    }
}

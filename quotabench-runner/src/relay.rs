//! Mirrors a [`BarrierSet`] into worker processes.
//!
//! The coordinator owns the only real barrier. Each worker process owns a local copy whose gates
//! are released by a line protocol on the worker's stdin:
//!
//! ```text
//! start
//! stop
//! ```
//!
//! [`forward_gates`] writes a line whenever a coordinator gate opens. [`relay_gates`] reads these
//! lines in the worker and releases the local gates. When the input ends, the local barrier is
//! dropped, which closes any gate that is still armed.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::barrier::{BarrierSet, BarrierWaiters, GateError};

const START: &str = "start";
const STOP: &str = "stop";

/// Writes a line to `writer` for each gate of `gates` as it opens.
///
/// Returns once both gates were forwarded, or once the coordinator's barrier closed. The writer is
/// shut down on return, so the worker observes the end of input.
pub async fn forward_gates<W>(mut gates: BarrierWaiters, mut writer: W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let result = async {
        if gates.start.wait().await.is_err() {
            return Ok(());
        }
        send_line(&mut writer, START).await?;

        if gates.stop.wait().await.is_err() {
            return Ok(());
        }
        send_line(&mut writer, STOP).await
    }
    .await;

    writer.shutdown().await.ok();
    result
}

async fn send_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Releases the gates of `barrier` as lines arrive on `reader`.
///
/// Consumes the barrier and drops it at the end of input. Unknown lines are logged and ignored.
pub async fn relay_gates<R>(reader: R, barrier: BarrierSet) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let gate = match line.trim() {
            START => &barrier.start,
            STOP => &barrier.stop,
            "" => continue,
            other => {
                tracing::warn!(line = other, "ignoring unknown gate command");
                continue;
            }
        };

        match gate.release() {
            Ok(_) | Err(GateError::AlreadyReleased(_)) => (),
            Err(error) => {
                tracing::warn!(error = &error as &dyn std::error::Error, "cannot relay gate")
            }
        }
    }

    tracing::debug!("gate relay reached end of input");
    Ok(())
}

use anyhow::Result;

/// Resolves once the process is asked to terminate.
pub async fn wait_for_shutdown() -> Result<()> {
    let signal = recv_signal().await?;
    tracing::info!(signal, "shutdown: signal received");
    Ok(())
}

#[cfg(unix)]
async fn recv_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
        _ = tokio::signal::ctrl_c() => "ctrl-c",
    };
    Ok(name)
}

#[cfg(windows)]
async fn recv_signal() -> Result<&'static str> {
    use tokio::signal::windows::{ctrl_break, ctrl_c, ctrl_close, ctrl_shutdown};

    let mut c = ctrl_c()?;
    let mut br = ctrl_break()?;
    let mut cl = ctrl_close()?;
    let mut sh = ctrl_shutdown()?;
    let name = tokio::select! {
        _ = c.recv() => "ctrl-c",
        _ = br.recv() => "ctrl-break",
        _ = cl.recv() => "ctrl-close",
        _ = sh.recv() => "ctrl-shutdown",
    };
    Ok(name)
}

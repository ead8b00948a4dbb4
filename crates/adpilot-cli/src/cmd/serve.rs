use super::open_engine;
use std::path::Path;
use std::sync::Arc;

pub fn run(root: &Path, port: u16, run_scheduler: bool) -> anyhow::Result<()> {
    let engine = Arc::new(open_engine(root)?);
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async move {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
        let actual_port = listener.local_addr()?.port();
        println!("adpilot API → http://localhost:{actual_port}  (PID {})", std::process::id());

        let scheduler = {
            let engine = engine.clone();
            async move {
                if run_scheduler {
                    engine.run_loop(std::future::pending()).await;
                } else {
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            res = adpilot_server::serve_on(engine, listener) => res,
            _ = scheduler => Ok(()),
            _ = tokio::signal::ctrl_c() => Ok(()),
        }
    })
}

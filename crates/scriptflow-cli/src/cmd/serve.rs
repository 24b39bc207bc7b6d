use crate::workspace::Workspace;
use anyhow::Result;

pub fn run(ws: Workspace, port: Option<u16>) -> Result<()> {
    let port = port.unwrap_or(ws.config.server.port);
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(scriptflow_server::serve(ws.config, port))
}

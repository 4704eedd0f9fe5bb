use anyhow::Context;
use common::{Request, Response};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

/// One connection per request to the capiopsd socket.
pub struct Client {
    socket: PathBuf,
}

impl Client {
    pub fn new(socket: impl AsRef<Path>) -> Self {
        Self { socket: socket.as_ref().to_path_buf() }
    }

    pub async fn request(&self, req: &Request) -> anyhow::Result<Response> {
        let stream = UnixStream::connect(&self.socket)
            .await
            .with_context(|| format!("connecting to capiopsd at {} (is it running?)", self.socket.display()))?;
        let (reader, mut writer) = stream.into_split();

        let mut bytes = serde_json::to_vec(req)?;
        bytes.push(b'\n');
        writer.write_all(&bytes).await?;

        let mut lines = BufReader::new(reader).lines();
        let line = lines
            .next_line()
            .await?
            .ok_or_else(|| anyhow::anyhow!("capiopsd closed the connection without answering"))?;
        Ok(serde_json::from_str(&line).context("decoding daemon response")?)
    }
}

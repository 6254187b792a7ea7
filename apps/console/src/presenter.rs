//! Terminal side of the UI dispatcher: prints toasts and reads answers.

use std::{io::Write, path::Path};

use anyhow::{Context, Result};
use client_core::LocalFile;
use shared::protocol::{NoticeKind, UiCommand};
use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines, Stdin},
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, info};

pub fn spawn_presenter(mut commands: mpsc::UnboundedReceiver<UiCommand>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            match command {
                UiCommand::Toast(notice) => {
                    let tag = match notice.kind {
                        NoticeKind::Success => "ok",
                        NoticeKind::Error => "error",
                        NoticeKind::Info => "info",
                        NoticeKind::Warning => "warn",
                    };
                    println!("[{tag}] {}", notice.message);
                }
                UiCommand::Refresh(target) => debug!(?target, "presenter: refresh requested"),
                UiCommand::ItemRemoved { table, id } => {
                    info!(%table, %id, "presenter: item removed")
                }
                UiCommand::ItemCreated { table, id } => {
                    info!(%table, %id, "presenter: item created")
                }
            }
        }
    })
}

/// Line-based prompts on stdin. A non-interactive prompter answers nothing.
pub struct Prompter {
    lines: Option<Lines<BufReader<Stdin>>>,
}

impl Prompter {
    pub fn new(interactive: bool) -> Self {
        Self {
            lines: interactive.then(|| BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.lines.is_some()
    }

    /// Next raw line, or `None` once stdin is closed.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        match self.lines.as_mut() {
            Some(lines) => {
                let line = lines.next_line().await.context("failed to read stdin")?;
                if line.is_none() {
                    self.lines = None;
                }
                Ok(line)
            }
            None => Ok(None),
        }
    }

    pub async fn ask(&mut self, label: &str) -> Result<Option<String>> {
        if !self.is_interactive() {
            return Ok(None);
        }
        print!("{label}: ");
        std::io::stdout().flush()?;
        Ok(self
            .next_line()
            .await?
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty()))
    }

    pub async fn confirm(&mut self, question: &str) -> Result<bool> {
        Ok(self
            .ask(&format!("{question} [y/N]"))
            .await?
            .is_some_and(|answer| answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")))
    }
}

pub async fn load_local_file(path: &Path) -> Result<LocalFile> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("attachment.bin")
        .to_string();
    let mime_type = mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("application/octet-stream");
    Ok(LocalFile::new(filename, mime_type, bytes))
}

//! OCR through the `tesseract` command-line tool.
//!
//! Image bytes are piped to `tesseract stdin stdout -l <lang> --psm <psm>`;
//! the output is normalized by trimming line ends and dropping blank lines.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use incident_harness_core::providers::TextExtractor;

use crate::config::OcrConfig;

pub struct TesseractExtractor {
    command: String,
    lang: String,
    psm: u8,
}

impl TesseractExtractor {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            command: config.command.clone(),
            lang: config.lang.clone(),
            psm: config.psm,
        }
    }
}

#[async_trait]
impl TextExtractor for TesseractExtractor {
    async fn extract(&self, image: &[u8]) -> Result<String> {
        let mut child = Command::new(&self.command)
            .args(["stdin", "stdout", "-l"])
            .arg(&self.lang)
            .arg("--psm")
            .arg(self.psm.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn OCR command '{}'", self.command))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("OCR command stdin unavailable"))?;
        let bytes = image.to_vec();
        // Write on a separate task so a full stdout pipe can't deadlock us.
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(&bytes).await;
            drop(stdin);
            result
        });

        let output = child.wait_with_output().await?;
        let written = writer.await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("OCR command exited with {}: {}", output.status, stderr.trim());
        }
        written.context("failed to send image to OCR command")?;
        Ok(normalize_text(&String::from_utf8_lossy(&output.stdout)))
    }
}

pub fn normalize_text(raw: &str) -> String {
    raw.lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;

/// A downloadable ONNX model: where it lives upstream and what it is called
/// locally.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelSpec {
    pub label: &'static str,
    pub filename: &'static str,
    pub url: &'static str,
}

pub const PALM_DETECTOR: ModelSpec = ModelSpec {
    label: "palm detector",
    filename: "palm_detection_mediapipe_2023feb.onnx",
    url: "https://raw.githubusercontent.com/214zzl995/gesture-universe/refs/heads/main/models/palm_detection_mediapipe_2023feb.onnx",
};

#[derive(Clone, Debug, PartialEq)]
pub enum ModelDownloadEvent {
    AlreadyPresent,
    Started { total: Option<u64> },
    Progress { downloaded: u64, total: Option<u64> },
    Finished,
}

impl ModelSpec {
    pub fn default_path(&self) -> PathBuf {
        PathBuf::from("models").join(self.filename)
    }

    /// Makes sure `path` holds this model, fetching it when missing. Progress
    /// is drawn on the terminal and mirrored to `on_event`.
    pub fn ensure_at<F>(&self, path: &Path, mut on_event: F) -> anyhow::Result<()>
    where
        F: FnMut(ModelDownloadEvent),
    {
        if path.exists() {
            on_event(ModelDownloadEvent::AlreadyPresent);
            return Ok(());
        }
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create model directory {}", dir.display()))?;
        }

        let mut bar = DownloadBar::default();
        self.fetch_into(path, |event| {
            bar.show(&event, self.label);
            on_event(event);
        })
        .with_context(|| {
            format!(
                "failed to download {} model to {}",
                self.label,
                path.display()
            )
        })
    }

    /// Streams the model into a sibling `.download` file and renames it over
    /// `dest` once complete, so a partial fetch never looks like a model.
    fn fetch_into<F>(&self, dest: &Path, mut on_event: F) -> anyhow::Result<()>
    where
        F: FnMut(ModelDownloadEvent),
    {
        log::info!("fetching {} model from {}", self.label, self.url);
        let mut response = Client::new()
            .get(self.url)
            .send()
            .context("model request failed")?
            .error_for_status()
            .context("model server returned an error")?;

        let total = response.content_length();
        on_event(ModelDownloadEvent::Started { total });

        let partial = dest.with_extension("download");
        let file = fs::File::create(&partial)
            .with_context(|| format!("failed to create {}", partial.display()))?;
        let mut sink = Counting {
            inner: file,
            written: 0,
            report: |downloaded: u64| on_event(ModelDownloadEvent::Progress { downloaded, total }),
        };
        io::copy(&mut response, &mut sink).context("model transfer interrupted")?;
        sink.inner
            .sync_all()
            .context("failed to flush model to disk")?;

        fs::rename(&partial, dest)
            .with_context(|| format!("failed to move {} into place", partial.display()))?;
        on_event(ModelDownloadEvent::Finished);
        Ok(())
    }
}

pub fn ensure_palm_model_ready(path: &Path) -> anyhow::Result<()> {
    PALM_DETECTOR.ensure_at(path, |_| {})
}

/// Writer that reports the running byte count after every write.
struct Counting<W, R> {
    inner: W,
    written: u64,
    report: R,
}

impl<W: Write, R: FnMut(u64)> Write for Counting<W, R> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        (self.report)(self.written);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Terminal progress for one download: a byte bar when the size is known, a
/// spinner otherwise.
#[derive(Default)]
struct DownloadBar(Option<ProgressBar>);

impl DownloadBar {
    fn show(&mut self, event: &ModelDownloadEvent, label: &str) {
        match *event {
            ModelDownloadEvent::Started { total: Some(len) } if len > 0 => {
                let style = ProgressStyle::with_template(
                    "{msg} [{bar:40}] {bytes}/{total_bytes} {bytes_per_sec}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar());
                let bar = ProgressBar::new(len).with_style(style);
                bar.set_message(label.to_string());
                self.0 = Some(bar);
            }
            ModelDownloadEvent::Started { .. } => {
                let style = ProgressStyle::with_template("{spinner} {msg} {bytes}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner());
                let bar = ProgressBar::new_spinner().with_style(style);
                bar.set_message(label.to_string());
                bar.enable_steady_tick(Duration::from_millis(120));
                self.0 = Some(bar);
            }
            ModelDownloadEvent::Progress { downloaded, .. } => {
                if let Some(bar) = &self.0 {
                    bar.set_position(downloaded);
                }
            }
            ModelDownloadEvent::Finished => {
                if let Some(bar) = self.0.take() {
                    bar.finish_with_message(format!("{label} ready"));
                }
            }
            ModelDownloadEvent::AlreadyPresent => {}
        }
    }
}

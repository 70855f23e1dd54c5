use super::*;

use std::process::Command;
use url::Url;

/// Clips a video to a time range. Implementations are blocking and run on the
/// blocking thread pool.
pub(crate) trait MediaTrimmer: Send + Sync {
    fn duration(&self, source: &Path) -> Result<f64>;
    fn trim(&self, source: &Path, start: f64, end: f64, dest: &Path) -> Result<()>;
}

#[derive(Clone, Debug)]
pub(crate) struct FetchedVideo {
    pub(crate) path: PathBuf,
    pub(crate) size: u64,
}

/// Downloads a single video from a supported provider into `target_dir`.
pub(crate) trait VideoFetcher: Send + Sync {
    fn fetch(&self, url: &Url, provider: Provider, target_dir: &Path) -> Result<FetchedVideo>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Provider {
    YouTube,
    Instagram,
}

impl Provider {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Provider::YouTube => "YouTube",
            Provider::Instagram => "Instagram",
        }
    }

    fn detect(host: &str) -> Option<Self> {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);
        match host {
            "youtube.com" | "m.youtube.com" | "music.youtube.com" | "youtu.be" => {
                Some(Provider::YouTube)
            }
            "instagram.com" | "m.instagram.com" => Some(Provider::Instagram),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum UrlRejection {
    Malformed,
    UnsupportedScheme(String),
    UnsupportedHost(String),
}

impl UrlRejection {
    pub(crate) fn message(&self) -> String {
        match self {
            UrlRejection::Malformed => "Please send a valid link (http:// or https://).".to_string(),
            UrlRejection::UnsupportedScheme(scheme) => {
                format!("Links with scheme \"{}\" are not supported. Use http or https.", scheme)
            }
            UrlRejection::UnsupportedHost(host) => format!(
                "{} is not supported. Only YouTube and Instagram links work.",
                host
            ),
        }
    }
}

pub(crate) fn parse_video_url(text: &str) -> std::result::Result<(Url, Provider), UrlRejection> {
    let candidate = text.trim();
    let url = Url::parse(candidate).map_err(|_| UrlRejection::Malformed)?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlRejection::UnsupportedScheme(url.scheme().to_string()));
    }
    let host = url.host_str().ok_or(UrlRejection::Malformed)?.to_string();
    let provider = Provider::detect(&host).ok_or(UrlRejection::UnsupportedHost(host))?;
    Ok((url, provider))
}

#[derive(Clone, Debug)]
pub(crate) struct FfmpegTrimmer {
    ffmpeg_bin: String,
    ffprobe_bin: String,
}

impl FfmpegTrimmer {
    pub(crate) fn new(ffmpeg_bin: impl Into<String>, ffprobe_bin: impl Into<String>) -> Self {
        FfmpegTrimmer {
            ffmpeg_bin: ffmpeg_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
        }
    }
}

impl MediaTrimmer for FfmpegTrimmer {
    fn duration(&self, source: &Path) -> Result<f64> {
        let output = Command::new(&self.ffprobe_bin)
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(source)
            .output()
            .context("run ffprobe")?;
        if !output.status.success() {
            return Err(anyhow!(format_tool_error("ffprobe", &output)));
        }
        parse_probe_duration(&output.stdout)
    }

    fn trim(&self, source: &Path, start: f64, end: f64, dest: &Path) -> Result<()> {
        // Re-encode so the cut lands on the requested times, not on keyframes.
        let output = Command::new(&self.ffmpeg_bin)
            .arg("-y")
            .arg("-i")
            .arg(source)
            .arg("-ss")
            .arg(format!("{:.3}", start))
            .arg("-to")
            .arg(format!("{:.3}", end))
            .args(["-c:v", "libx264", "-c:a", "aac", "-movflags", "+faststart"])
            .arg(dest)
            .output()
            .context("run ffmpeg")?;
        if !output.status.success() {
            return Err(anyhow!(format_tool_error("ffmpeg", &output)));
        }
        if !dest.exists() {
            return Err(anyhow!("ffmpeg output not found: {}", dest.display()));
        }
        Ok(())
    }
}

pub(crate) fn parse_probe_duration(stdout: &[u8]) -> Result<f64> {
    let value: serde_json::Value = serde_json::from_slice(stdout).context("parse ffprobe json")?;
    let duration = value
        .get("format")
        .and_then(|format| format.get("duration"))
        .and_then(|duration| match duration {
            serde_json::Value::String(text) => text.parse::<f64>().ok(),
            serde_json::Value::Number(number) => number.as_f64(),
            _ => None,
        })
        .ok_or_else(|| anyhow!("ffprobe reported no duration"))?;
    if !duration.is_finite() || duration <= 0.0 {
        return Err(anyhow!("invalid duration {}", duration));
    }
    Ok(duration)
}

#[derive(Clone, Debug)]
pub(crate) struct YtDlpFetcher {
    ytdlp_bin: String,
    max_bytes: u64,
}

impl YtDlpFetcher {
    pub(crate) fn new(ytdlp_bin: impl Into<String>, max_bytes: u64) -> Self {
        YtDlpFetcher {
            ytdlp_bin: ytdlp_bin.into(),
            max_bytes,
        }
    }
}

impl VideoFetcher for YtDlpFetcher {
    fn fetch(&self, url: &Url, provider: Provider, target_dir: &Path) -> Result<FetchedVideo> {
        let template = target_dir.join("%(id)s.%(ext)s");
        let output = Command::new(&self.ytdlp_bin)
            .arg("--no-playlist")
            .arg("-f")
            .arg(format_selector(provider))
            .arg("--max-filesize")
            .arg(self.max_bytes.to_string())
            .arg("--print")
            .arg("after_move:filepath")
            .arg("-o")
            .arg(template.to_string_lossy().to_string())
            .arg(url.as_str())
            .output()
            .context("run yt-dlp")?;
        if !output.status.success() {
            return Err(anyhow!(format_tool_error("yt-dlp", &output)));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let path_line = stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| anyhow!("yt-dlp did not download anything (file too large or not a video)"))?;
        let mut path = PathBuf::from(path_line.trim());
        if path.is_relative() {
            path = target_dir.join(path);
        }
        let size = fs::metadata(&path)
            .with_context(|| format!("yt-dlp output not found: {}", path.display()))?
            .len();
        Ok(FetchedVideo { path, size })
    }
}

fn format_selector(provider: Provider) -> &'static str {
    match provider {
        Provider::YouTube => "best[ext=mp4][vcodec!=none][acodec!=none]/best[ext=mp4]/best",
        Provider::Instagram => "best[ext=mp4]/best",
    }
}

pub(crate) fn format_tool_error(tool: &str, output: &std::process::Output) -> String {
    let mut message = format!("{} failed.", tool);
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !stderr.is_empty() {
        message.push_str("\nstderr:\n");
        message.push_str(&trim_tail(&stderr, 600));
    }
    message
}

pub(crate) fn trim_tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - max_chars).collect();
    format!("...{}", tail)
}

pub(crate) fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0usize;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

pub(crate) fn megabytes(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
}

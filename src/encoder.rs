use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::config::EncodeSettings;
use crate::error::EncodeError;

/// Transcodes an intermediate waveform into the final compressed file.
///
/// Calls block until the transcode finishes; they cannot be interrupted.
pub trait AudioEncoder {
    fn encode(&self, input_wav: &Path, output: &Path) -> Result<(), EncodeError>;
}

/// Opus encoding through an `ffmpeg` subprocess.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    settings: EncodeSettings,
}

impl FfmpegEncoder {
    pub fn new(settings: EncodeSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &EncodeSettings {
        &self.settings
    }

    /// Arguments passed to ffmpeg for one transcode.
    pub fn args(&self, input_wav: &Path, output: &Path) -> Vec<OsString> {
        let s = &self.settings;
        let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), input_wav.into()];
        if s.leading_pad_secs > 0 {
            args.push("-af".into());
            args.push(format!("adelay={}s:all=true", s.leading_pad_secs).into());
        }
        args.extend(
            [
                "-c:a".to_string(),
                "libopus".to_string(),
                "-b:a".to_string(),
                format!("{}k", s.bitrate_kbps),
                "-vbr".to_string(),
                if s.vbr { "on" } else { "off" }.to_string(),
            ]
            .map(OsString::from),
        );
        args.push(output.into());
        args
    }
}

impl AudioEncoder for FfmpegEncoder {
    fn encode(&self, input_wav: &Path, output: &Path) -> Result<(), EncodeError> {
        let program = self.settings.program.display().to_string();
        log::debug!(
            "Encoding {} -> {} with {}",
            input_wav.display(),
            output.display(),
            program
        );

        let result = Command::new(&self.settings.program)
            .args(self.args(input_wav, output))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    EncodeError::NotFound {
                        program: program.clone(),
                    }
                } else {
                    EncodeError::Spawn {
                        program: program.clone(),
                        source: e,
                    }
                }
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(EncodeError::Failed {
                code: result.status.code(),
                stderr: last_lines(&stderr, 5),
            });
        }

        Ok(())
    }
}

// ffmpeg prints its banner and stream info before the actual error.
fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

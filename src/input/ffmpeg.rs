use super::{
    child::ChildContainer,
    error::{AudioStreamError, Result},
    FrameSource,
    PlaybackSource,
    TranscodePipeline,
};
use crate::{constants::SAMPLE_RATE_RAW, Config};
use std::process::{Command, Stdio};
use tracing::debug;

/// Starts a decoder for a resolved source.
pub trait Transcode: Send + Sync {
    /// Begins decoding `source` into Opus frames.
    ///
    /// The returned source may still be buffering; callers must wait on
    /// [`FrameSource::readable`] before pulling frames.
    fn start(&self, source: &PlaybackSource, config: &Config) -> Result<Box<dyn FrameSource>>;
}

/// Transcodes any input `ffmpeg` understands into 20ms Ogg Opus frames.
///
/// The executable is taken from [`Config::ffmpeg_program`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Ffmpeg;

impl Ffmpeg {
    /// Returns the arguments used to decode `source`.
    pub fn args(source: &PlaybackSource) -> Vec<String> {
        let mut args: Vec<String> = ["-analyzeduration", "0", "-loglevel", "0"]
            .into_iter()
            .map(String::from)
            .collect();

        if source.is_remote() {
            args.extend(
                [
                    "-reconnect",
                    "1",
                    "-reconnect_streamed",
                    "1",
                    "-reconnect_delay_max",
                    "5",
                ]
                .map(String::from),
            );
        }

        args.push("-ss".into());
        args.push(format!("{:.3}", source.seek_offset.as_secs_f64()));
        args.push("-i".into());
        args.push(source.location.clone());

        if !source.filters.is_empty() {
            args.push("-af".into());
            args.push(source.filters.to_string());
        }

        args.extend(["-f", "opus", "-c:a", "libopus"].map(String::from));
        args.push("-ar".into());
        args.push(SAMPLE_RATE_RAW.to_string());
        args.extend(["-ac", "2", "-frame_duration", "20", "pipe:1"].map(String::from));

        args
    }
}

impl Transcode for Ffmpeg {
    fn start(&self, source: &PlaybackSource, config: &Config) -> Result<Box<dyn FrameSource>> {
        let args = Self::args(source);
        debug!("Starting {} {:?}", config.ffmpeg_program, args);

        let mut child = Command::new(&config.ffmpeg_program)
            .args(&args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take();
        let child = ChildContainer::from(child);
        let stdout = stdout.ok_or(AudioStreamError::Stdout)?;

        let pipeline = TranscodePipeline::new(stdout, Some(child), source, config.frame_buffer)?;

        Ok(Box::new(pipeline))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::input::FilterChain;
    use std::time::Duration;

    #[test]
    fn local_source_args() {
        let source = PlaybackSource::new("/music/song.flac").seek_offset(Duration::from_millis(1500));

        assert_eq!(Ffmpeg::args(&source).join(" "), concat!(
            "-analyzeduration 0 -loglevel 0 -ss 1.500 -i /music/song.flac ",
            "-f opus -c:a libopus -ar 48000 -ac 2 -frame_duration 20 pipe:1",
        ));
    }

    #[test]
    fn remote_filtered_source_args() {
        let source = PlaybackSource::new("https://cdn.example.com/a.webm")
            .filters(FilterChain::new().volume(0.5).tempo(1.25));

        let args = Ffmpeg::args(&source);

        let i = args.iter().position(|a| a == "-i").unwrap();
        assert!(args[..i].iter().any(|a| a == "-reconnect"));

        let af = args.iter().position(|a| a == "-af").unwrap();
        assert_eq!(args[af + 1], "volume=0.5,atempo=1.25");
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let config = Config::default().ffmpeg_program("/nonexistent/warbler-ffmpeg");

        assert!(matches!(
            Ffmpeg.start(&PlaybackSource::new("a.ogg"), &config),
            Err(AudioStreamError::Spawn(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_program_never_becomes_readable() {
        let config = Config::default().ffmpeg_program("true");

        let mut source = Ffmpeg.start(&PlaybackSource::new("a.ogg"), &config).unwrap();

        assert!(source.readable().await.is_err());
        source.destroy();
    }
}

use super::{
    child::ChildContainer,
    error::{AudioStreamError, Result},
    PlaybackSource,
};
use crate::constants::TIMESTEP_LENGTH;
use async_trait::async_trait;
use flume::{Receiver, Sender, TryRecvError};
use std::{io::ErrorKind as IoErrorKind, io::Read, sync::Arc, thread, time::Duration};
use symphonia::{
    core::{
        errors::Error as SymphError,
        formats::{FormatOptions, FormatReader},
        io::{MediaSourceStream, MediaSourceStreamOptions, ReadOnlySource},
    },
    default::formats::OggReader,
};
use tracing::{debug, trace};

/// Where a [`FrameSource`] is in its life.
#[derive(Clone, Debug)]
pub enum Lifecycle {
    /// More frames may yet arrive.
    Running,
    /// The source finished normally, or was destroyed.
    Ended,
    /// The source failed.
    Errored(Arc<AudioStreamError>),
}

impl Lifecycle {
    /// Returns whether no more frames will arrive.
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// A pull-based supply of encoded Opus frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Waits until the first frame is available.
    ///
    /// Fails if the source ends or errors before producing anything, with the
    /// same error later reported by [`lifecycle`]. Callers should bound this
    /// wait with a timeout.
    ///
    /// [`lifecycle`]: Self::lifecycle
    async fn readable(&mut self) -> std::result::Result<(), Arc<AudioStreamError>>;

    /// Takes the next frame, if one is buffered.
    ///
    /// `None` with a [`Lifecycle::Running`] source is an underrun, not an end.
    fn try_read(&mut self) -> Option<Vec<u8>>;

    /// Returns whether this source is still producing frames.
    fn lifecycle(&self) -> Lifecycle;

    /// Returns the playback position reached by the frames read so far.
    fn elapsed(&self) -> Duration;

    /// Releases the decoder and any buffered frames. Safe to call repeatedly.
    fn destroy(&mut self);
}

#[derive(Debug)]
pub(crate) enum PipeMessage {
    Frame(Vec<u8>),
    End,
    Error(AudioStreamError),
}

/// Opus frames demultiplexed from a decoder's Ogg output.
///
/// A reader thread parses the output and hands frames over through a bounded
/// queue, so the decoder stalls rather than buffering without limit.
#[derive(Debug)]
pub struct TranscodePipeline {
    rx: Option<Receiver<PipeMessage>>,
    pending: Option<Vec<u8>>,
    lifecycle: Lifecycle,
    child: Option<ChildContainer>,
    frames: u64,
    seek_offset: Duration,
    tempo: f64,
}

impl TranscodePipeline {
    /// Starts reading Ogg Opus from `reader` on a dedicated thread.
    ///
    /// `child`, if given, is killed when this pipeline is destroyed.
    pub fn new<R>(
        reader: R,
        child: Option<ChildContainer>,
        source: &PlaybackSource,
        buffer: usize,
    ) -> Result<Self>
    where
        R: Read + Send + Sync + 'static,
    {
        let (tx, rx) = flume::bounded(buffer.max(1));

        thread::Builder::new()
            .name("warbler-demux".into())
            .spawn(move || demux(reader, &tx))?;

        Ok(Self::with_receiver(rx, child, source))
    }

    pub(crate) fn with_receiver(
        rx: Receiver<PipeMessage>,
        child: Option<ChildContainer>,
        source: &PlaybackSource,
    ) -> Self {
        Self {
            rx: Some(rx),
            pending: None,
            lifecycle: Lifecycle::Running,
            child,
            frames: 0,
            seek_offset: source.seek_offset,
            tempo: source.filters.tempo_factor(),
        }
    }

    fn poll(&mut self) -> Option<Vec<u8>> {
        let rx = self.rx.as_ref()?;

        match rx.try_recv() {
            Ok(PipeMessage::Frame(frame)) => Some(frame),
            Ok(PipeMessage::End) | Err(TryRecvError::Disconnected) => {
                self.finish(Lifecycle::Ended);
                None
            },
            Ok(PipeMessage::Error(e)) => {
                self.finish(Lifecycle::Errored(Arc::new(e)));
                None
            },
            Err(TryRecvError::Empty) => None,
        }
    }

    fn finish(&mut self, lifecycle: Lifecycle) {
        if !self.lifecycle.is_finished() {
            self.lifecycle = lifecycle;
        }
        self.destroy();
    }
}

#[async_trait]
impl FrameSource for TranscodePipeline {
    async fn readable(&mut self) -> std::result::Result<(), Arc<AudioStreamError>> {
        if self.pending.is_some() {
            return Ok(());
        }

        let Some(rx) = self.rx.clone() else {
            return Err(match self.lifecycle() {
                Lifecycle::Errored(e) => e,
                _ => Arc::new(AudioStreamError::EndedBeforeReadable),
            });
        };

        match rx.recv_async().await {
            Ok(PipeMessage::Frame(frame)) => {
                self.pending = Some(frame);
                Ok(())
            },
            Ok(PipeMessage::Error(e)) => {
                let e = Arc::new(e);
                self.finish(Lifecycle::Errored(e.clone()));
                Err(e)
            },
            Ok(PipeMessage::End) | Err(_) => {
                self.finish(Lifecycle::Ended);
                Err(Arc::new(AudioStreamError::EndedBeforeReadable))
            },
        }
    }

    fn try_read(&mut self) -> Option<Vec<u8>> {
        let frame = self.pending.take().or_else(|| self.poll())?;
        self.frames += 1;
        Some(frame)
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.clone()
    }

    fn elapsed(&self) -> Duration {
        let played = TIMESTEP_LENGTH * u32::try_from(self.frames).unwrap_or(u32::MAX);

        #[allow(clippy::float_cmp)]
        let played = if self.tempo == 1.0 {
            played
        } else {
            played.mul_f64(self.tempo)
        };

        self.seek_offset + played
    }

    fn destroy(&mut self) {
        if !self.lifecycle.is_finished() {
            self.lifecycle = Lifecycle::Ended;
        }

        self.rx = None;
        self.pending = None;

        if let Some(mut child) = self.child.take() {
            child.kill();
        }
    }
}

impl Drop for TranscodePipeline {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn demux<R: Read + Send + Sync + 'static>(reader: R, tx: &Sender<PipeMessage>) {
    let mss = MediaSourceStream::new(
        Box::new(ReadOnlySource::new(reader)),
        MediaSourceStreamOptions::default(),
    );

    let mut format = match OggReader::try_new(mss, &FormatOptions::default()) {
        Ok(format) => format,
        Err(e) => {
            debug!("Could not open decoder output: {e}.");
            drop(tx.send(PipeMessage::Error(e.into())));
            return;
        },
    };

    loop {
        let msg = match format.next_packet() {
            Ok(packet) => PipeMessage::Frame(packet.data.into_vec()),
            Err(SymphError::IoError(e)) if e.kind() == IoErrorKind::UnexpectedEof =>
                PipeMessage::End,
            Err(e) => PipeMessage::Error(e.into()),
        };

        let last = !matches!(msg, PipeMessage::Frame(_));

        // A closed queue means the pipeline was destroyed.
        if tx.send(msg).is_err() || last {
            break;
        }
    }

    trace!("Demux thread finished.");
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::input::FilterChain;
    use std::io::Cursor;

    fn scripted(source: &PlaybackSource) -> (Sender<PipeMessage>, TranscodePipeline) {
        let (tx, rx) = flume::unbounded();
        (tx, TranscodePipeline::with_receiver(rx, None, source))
    }

    #[tokio::test]
    async fn readable_holds_first_frame() {
        let (tx, mut pipe) = scripted(&PlaybackSource::new("a"));
        tx.send(PipeMessage::Frame(vec![1])).unwrap();
        tx.send(PipeMessage::Frame(vec![2])).unwrap();

        pipe.readable().await.unwrap();
        assert_eq!(pipe.elapsed(), Duration::ZERO);

        assert_eq!(pipe.try_read(), Some(vec![1]));
        assert_eq!(pipe.try_read(), Some(vec![2]));
        assert_eq!(pipe.elapsed(), Duration::from_millis(40));
    }

    #[tokio::test]
    async fn ended_before_readable_fails() {
        let (tx, mut pipe) = scripted(&PlaybackSource::new("a"));
        tx.send(PipeMessage::End).unwrap();

        assert!(matches!(
            pipe.readable().await,
            Err(e) if matches!(*e, AudioStreamError::EndedBeforeReadable)
        ));
        assert!(matches!(pipe.lifecycle(), Lifecycle::Ended));
    }

    #[tokio::test]
    async fn error_before_readable_is_kept() {
        let (tx, mut pipe) = scripted(&PlaybackSource::new("a"));
        tx.send(PipeMessage::Error(AudioStreamError::Stdout)).unwrap();

        let err = pipe.readable().await.unwrap_err();
        assert!(matches!(*err, AudioStreamError::Stdout));

        match pipe.lifecycle() {
            Lifecycle::Errored(e) => assert!(Arc::ptr_eq(&e, &err)),
            other => panic!("expected errored lifecycle, saw {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_ogg_output_fails_before_readable() {
        let mut pipe = TranscodePipeline::new(
            Cursor::new(b"definitely not an ogg stream".to_vec()),
            None,
            &PlaybackSource::new("a"),
            4,
        )
        .unwrap();

        assert!(pipe.readable().await.is_err());
        assert!(pipe.try_read().is_none());
    }

    #[test]
    fn underrun_is_not_an_end() {
        let (_tx, mut pipe) = scripted(&PlaybackSource::new("a"));

        assert_eq!(pipe.try_read(), None);
        assert!(matches!(pipe.lifecycle(), Lifecycle::Running));
    }

    #[test]
    fn end_and_error_set_lifecycle() {
        let (tx, mut pipe) = scripted(&PlaybackSource::new("a"));
        tx.send(PipeMessage::Frame(vec![0])).unwrap();
        tx.send(PipeMessage::End).unwrap();

        assert!(pipe.try_read().is_some());
        assert!(pipe.try_read().is_none());
        assert!(matches!(pipe.lifecycle(), Lifecycle::Ended));

        let (tx, mut pipe) = scripted(&PlaybackSource::new("a"));
        tx.send(PipeMessage::Error(AudioStreamError::Stdout)).unwrap();

        assert!(pipe.try_read().is_none());
        assert!(matches!(pipe.lifecycle(), Lifecycle::Errored(_)));
    }

    #[test]
    fn elapsed_counts_seek_and_tempo() {
        let source = PlaybackSource::new("a")
            .seek_offset(Duration::from_secs(10))
            .filters(FilterChain::new().tempo(1.5));
        let (tx, mut pipe) = scripted(&source);

        for _ in 0..50 {
            tx.send(PipeMessage::Frame(vec![0])).unwrap();
        }
        while pipe.try_read().is_some() {}

        assert_eq!(pipe.elapsed(), Duration::from_millis(11_500));
    }

    #[test]
    fn destroy_is_idempotent() {
        let (tx, mut pipe) = scripted(&PlaybackSource::new("a"));
        tx.send(PipeMessage::Frame(vec![0])).unwrap();

        pipe.destroy();
        pipe.destroy();

        assert!(pipe.try_read().is_none());
        assert!(matches!(pipe.lifecycle(), Lifecycle::Ended));
        assert!(tx.send(PipeMessage::End).is_err());
    }
}

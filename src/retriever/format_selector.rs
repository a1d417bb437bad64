// FormatSelector - picks which stream(s) to fetch for a requested output
//
// Rules:
// - Audio output: best audio-only stream, else best muxed stream
// - Video output: best muxed stream, else best video-only + best audio-only pair
// - Equal quality keeps the provider's own order (first one wins)
//
// Pure function over descriptors; no I/O.

use super::errors::RetrievalError;
use super::models::{OutputKind, SelectionPlan, StreamDescriptor, StreamKind};

pub struct FormatSelector;

impl FormatSelector {
    pub fn select(
        descriptors: &[StreamDescriptor],
        output_kind: OutputKind,
    ) -> Result<SelectionPlan, RetrievalError> {
        match output_kind {
            OutputKind::Audio => Self::select_audio(descriptors),
            OutputKind::Video => Self::select_video(descriptors),
        }
    }

    fn select_audio(descriptors: &[StreamDescriptor]) -> Result<SelectionPlan, RetrievalError> {
        // kbps and pixel rows are not comparable, so muxed only counts when
        // there is no audio-only stream at all
        Self::find_best(descriptors, StreamKind::Audio)
            .or_else(|| Self::find_best(descriptors, StreamKind::Muxed))
            .map(|d| SelectionPlan::Single(d.clone()))
            .ok_or_else(|| {
                RetrievalError::NoSuitableStream(format!(
                    "no audio or muxed stream among {} candidate(s)",
                    descriptors.len()
                ))
            })
    }

    fn select_video(descriptors: &[StreamDescriptor]) -> Result<SelectionPlan, RetrievalError> {
        if let Some(muxed) = Self::find_best(descriptors, StreamKind::Muxed) {
            return Ok(SelectionPlan::Single(muxed.clone()));
        }

        let video = Self::find_best(descriptors, StreamKind::Video);
        let audio = Self::find_best(descriptors, StreamKind::Audio);

        match (video, audio) {
            (Some(video), Some(audio)) => Ok(SelectionPlan::Pair {
                video: video.clone(),
                audio: audio.clone(),
            }),
            (Some(_), None) => Err(RetrievalError::NoSuitableStream(
                "video-only stream found but no audio stream to mux with".to_string(),
            )),
            _ => Err(RetrievalError::NoSuitableStream(format!(
                "no muxed or video stream among {} candidate(s)",
                descriptors.len()
            ))),
        }
    }

    /// Highest quality of one kind; ties go to the earliest descriptor
    fn find_best(descriptors: &[StreamDescriptor], kind: StreamKind) -> Option<&StreamDescriptor> {
        descriptors
            .iter()
            .filter(|d| d.kind == kind)
            .fold(None, |best: Option<&StreamDescriptor>, d| match best {
                Some(b) if b.quality >= d.quality => Some(b),
                _ => Some(d),
            })
    }
}

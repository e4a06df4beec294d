use super::psi::{ElementaryStreamInfo, Program};
use super::types::*;
use crate::av::{Caps, StreamHandle, StreamKind};

fn h264() -> Caps {
    Caps::new("video/x-h264")
        .with_str("stream-format", "byte-stream")
        .with_str("alignment", "nal")
}

/// Builds the output handle for an elementary stream of `program`.
///
/// Returns `None` for streams that are never exposed: HDV auxiliary
/// streams, section-carrying stream types, and types or descriptor
/// combinations that cannot be identified.
pub fn handle_for_stream(info: &ElementaryStreamInfo, program: &Program) -> Option<StreamHandle> {
    let registration = info
        .descriptor(DESC_REGISTRATION)
        .and_then(|d| d.format_identifier());

    let (kind, caps) = match info.stream_type {
        StreamType::VideoMpeg1 | StreamType::VideoMpeg2 => (
            StreamKind::Video,
            Caps::new("video/mpeg")
                .with_int(
                    "mpegversion",
                    if info.stream_type == StreamType::VideoMpeg1 { 1 } else { 2 },
                )
                .with_bool("systemstream", false),
        ),
        StreamType::AudioMpeg1 | StreamType::AudioMpeg2 => (
            StreamKind::Audio,
            Caps::new("audio/mpeg").with_int("mpegversion", 1),
        ),
        StreamType::PrivateData => private_data(info, program)?,
        StreamType::AudioAac => (
            StreamKind::Audio,
            Caps::new("audio/mpeg").with_int("mpegversion", 4),
        ),
        StreamType::VideoMpeg4 => (
            StreamKind::Video,
            Caps::new("video/mpeg")
                .with_int("mpegversion", 4)
                .with_bool("systemstream", false),
        ),
        StreamType::VideoH264 => (StreamKind::Video, h264()),
        StreamType::VideoDirac if registration == Some(DRF_ID_DIRAC) => {
            (StreamKind::Video, Caps::new("video/x-dirac"))
        }
        StreamType::PrivateEa if registration == Some(DRF_ID_VC1) => {
            log::warn!(
                "0xea private stream type on PID {:#06x} without VC-1 details, assuming plain VC-1",
                info.pid
            );
            (
                StreamKind::Video,
                Caps::new("video/x-wmv")
                    .with_int("wmvversion", 3)
                    .with_str("format", "WVC1"),
            )
        }
        StreamType::BdAudioAc3 => {
            if program.registration_id() == Some(DRF_ID_HDMV)
                || info.descriptor(DESC_DVB_ENHANCED_AC3).is_some()
            {
                (StreamKind::Audio, Caps::new("audio/x-eac3"))
            } else {
                if info.descriptor(DESC_DVB_AC3).is_none() {
                    log::warn!(
                        "AC3 stream type on PID {:#06x} without a descriptor telling AC3 from EAC3, assuming plain AC3",
                        info.pid
                    );
                }
                (StreamKind::Audio, Caps::new("audio/x-ac3"))
            }
        }
        StreamType::BdAudioEac3 => (StreamKind::Audio, Caps::new("audio/x-eac3")),
        StreamType::PsAudioDts => (StreamKind::Audio, Caps::new("audio/x-dts")),
        StreamType::PsAudioLpcm => (StreamKind::Audio, Caps::new("audio/x-lpcm")),
        StreamType::BdAudioLpcm => (StreamKind::Audio, Caps::new("audio/x-private-ts-lpcm")),
        StreamType::BdPgsSubpicture => (StreamKind::Subpicture, Caps::new("subpicture/x-pgs")),
        // HDV helper streams, section-carrying types, 0xff (DVD sub-picture
        // only exists in program streams) and anything unknown
        _ => return None,
    };

    let handle = StreamHandle::new(info.pid, kind, caps);
    log::trace!("stream {:#06x} gets output {} with caps {}", info.pid, handle.name, handle.caps);
    Some(handle)
}

/// DVB private data, identified by its descriptors.
fn private_data(info: &ElementaryStreamInfo, program: &Program) -> Option<(StreamKind, Caps)> {
    if info.descriptor(DESC_DVB_AC3).is_some() {
        return Some((StreamKind::Audio, Caps::new("audio/x-ac3")));
    }
    if info.descriptor(DESC_DVB_ENHANCED_AC3).is_some() {
        return Some((StreamKind::Audio, Caps::new("audio/x-eac3")));
    }
    if info.descriptor(DESC_DVB_TELETEXT).is_some() {
        return Some((StreamKind::Private, Caps::new("private/teletext")));
    }
    // ITV HD (service 10510) carries H.264 video as private data on PID 3401
    if program.program_number == 10510 && info.pid == 3401 {
        return Some((StreamKind::Video, h264()));
    }
    if info.descriptor(DESC_DVB_SUBTITLING).is_some() {
        return Some((StreamKind::Private, Caps::new("subpicture/x-dvb")));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn handle(info: ElementaryStreamInfo, program: &Program) -> Option<StreamHandle> {
        handle_for_stream(&info, program)
    }

    #[test]
    fn test_plain_stream_types() {
        let program = Program::new(1, 0x1000, 0x100);

        let video = handle(ElementaryStreamInfo::new(StreamType::VideoMpeg2, 0x100), &program).unwrap();
        assert_eq!(video.name, "video_0100");
        assert_eq!(
            video.caps.to_string(),
            "video/mpeg, mpegversion=(int)2, systemstream=(boolean)false"
        );

        let audio = handle(ElementaryStreamInfo::new(StreamType::AudioAac, 0x101), &program).unwrap();
        assert_eq!(audio.name, "audio_0101");
        assert_eq!(audio.caps.to_string(), "audio/mpeg, mpegversion=(int)4");

        let h264 = handle(ElementaryStreamInfo::new(StreamType::VideoH264, 0x1e1), &program).unwrap();
        assert_eq!(
            h264.caps.to_string(),
            "video/x-h264, stream-format=(string)byte-stream, alignment=(string)nal"
        );

        let pgs = handle(ElementaryStreamInfo::new(StreamType::BdPgsSubpicture, 0x1200), &program)
            .unwrap();
        assert_eq!(pgs.name, "subpicture_1200");
        assert_eq!(pgs.kind, StreamKind::Subpicture);
    }

    #[test]
    fn test_unexposed_stream_types() {
        let program = Program::new(1, 0x1000, 0x100);
        for stream_type in [
            StreamType::HdvAuxA,
            StreamType::HdvAuxV,
            StreamType::PrivateSections,
            StreamType::Dsmcc,
            StreamType::Mheg,
            StreamType::Other(0x42),
            StreamType::PrivateData,
            StreamType::VideoDirac,
            StreamType::PrivateEa,
            StreamType::PsDvdSubpicture,
        ] {
            assert_eq!(handle(ElementaryStreamInfo::new(stream_type, 0x100), &program), None);
        }
    }

    #[test]
    fn test_private_data_descriptors() {
        let program = Program::new(1, 0x1000, 0x100);
        let with = |tag| {
            handle(
                ElementaryStreamInfo::new(StreamType::PrivateData, 0x102)
                    .with_descriptor(Descriptor::new(tag, Vec::<u8>::new())),
                &program,
            )
            .map(|h| (h.name, h.caps.media_type))
        };

        assert_eq!(with(DESC_DVB_AC3), Some(("audio_0102".into(), "audio/x-ac3")));
        assert_eq!(with(DESC_DVB_ENHANCED_AC3), Some(("audio_0102".into(), "audio/x-eac3")));
        assert_eq!(with(DESC_DVB_TELETEXT), Some(("private_0102".into(), "private/teletext")));
        assert_eq!(with(DESC_DVB_SUBTITLING), Some(("private_0102".into(), "subpicture/x-dvb")));
    }

    #[test]
    fn test_registration_descriptors() {
        let program = Program::new(1, 0x1000, 0x100);
        let dirac = ElementaryStreamInfo::new(StreamType::VideoDirac, 0x100)
            .with_descriptor(Descriptor::registration(DRF_ID_DIRAC));
        assert_eq!(handle(dirac, &program).unwrap().caps.media_type, "video/x-dirac");

        let vc1 = ElementaryStreamInfo::new(StreamType::PrivateEa, 0x100)
            .with_descriptor(Descriptor::registration(DRF_ID_VC1));
        assert_eq!(
            handle(vc1, &program).unwrap().caps.to_string(),
            "video/x-wmv, wmvversion=(int)3, format=(string)WVC1"
        );

        let ac3 = ElementaryStreamInfo::new(StreamType::BdAudioAc3, 0x101);
        assert_eq!(handle(ac3.clone(), &program).unwrap().caps.media_type, "audio/x-ac3");

        let hdmv = Program::new(1, 0x1000, 0x100).with_descriptor(Descriptor::registration(DRF_ID_HDMV));
        assert_eq!(handle(ac3, &hdmv).unwrap().caps.media_type, "audio/x-eac3");
    }
}

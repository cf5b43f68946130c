//! JPEG-LS marker segments.

use crate::codec::InterleaveMode;
use crate::error::DecodeError;

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const DRI: u8 = 0xDD;
const COM: u8 = 0xFE;
/// Start of frame, JPEG-LS process.
const SOF55: u8 = 0xF7;
/// JPEG-LS preset parameters.
const LSE: u8 = 0xF8;

/// Sample precision written and accepted.
const PRECISION: u8 = 8;

/// Frame parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    pub(crate) width: u32,
    pub(crate) height: u32,
    /// Component identifiers, in channel order.
    pub(crate) component_ids: Vec<u8>,
}

/// Scan parameters, with components resolved to channel indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScanHeader {
    pub(crate) components: Vec<usize>,
    pub(crate) mode: InterleaveMode,
}

#[derive(Debug)]
pub(crate) enum Segment {
    Frame(FrameHeader),
    Scan(ScanHeader),
    End,
}

fn write_marker(out: &mut Vec<u8>, code: u8) {
    out.push(0xFF);
    out.push(code);
}

fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn write_start_of_image(out: &mut Vec<u8>) {
    write_marker(out, SOI);
}

pub(crate) fn write_end_of_image(out: &mut Vec<u8>) {
    write_marker(out, EOI);
}

/// SOF55 with 1x1 sampling for every component. Component `i` gets id `i + 1`.
pub(crate) fn write_frame_header(out: &mut Vec<u8>, width: u16, height: u16, components: u8) {
    write_marker(out, SOF55);
    write_u16(out, 8 + 3 * u16::from(components));
    out.push(PRECISION);
    write_u16(out, height);
    write_u16(out, width);
    out.push(components);
    for id in 1..=components {
        out.extend_from_slice(&[id, 0x11, 0]);
    }
}

/// SOS for lossless coding (NEAR = 0) with default parameters.
pub(crate) fn write_scan_header(out: &mut Vec<u8>, components: &[usize], mode: InterleaveMode) {
    write_marker(out, SOS);
    write_u16(out, 6 + 2 * components.len() as u16);
    out.push(components.len() as u8);
    for &channel in components {
        out.extend_from_slice(&[channel as u8 + 1, 0]);
    }
    out.push(0); // NEAR
    out.push(mode.ilv());
    out.push(0); // point transform
}

/// Walks the marker structure of a JPEG-LS stream.
#[derive(Debug)]
pub(crate) struct MarkerReader<'a> {
    data: &'a [u8],
    pos: usize,
    frame_ids: Vec<u8>,
}

impl<'a> MarkerReader<'a> {
    /// Fails with [`DecodeError::InvalidFormat`] unless the stream opens with SOI.
    pub(crate) fn new(data: &'a [u8]) -> Result<Self, DecodeError> {
        if data.len() < 2 || data[0] != 0xFF || data[1] != SOI {
            return Err(DecodeError::InvalidFormat);
        }
        Ok(Self {
            data,
            pos: 2,
            frame_ids: Vec::new(),
        })
    }

    fn byte(&mut self) -> Result<u8, DecodeError> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| truncated("marker segment"))?;
        self.pos += 1;
        Ok(b)
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes([self.byte()?, self.byte()?]))
    }

    /// Body of a length-prefixed segment, excluding the length field.
    fn segment_body(&mut self) -> Result<&'a [u8], DecodeError> {
        let length = usize::from(self.u16()?);
        if length < 2 {
            return Err(DecodeError::CorruptedData(format!(
                "segment length {length} is too short"
            )));
        }
        let end = self.pos + length - 2;
        let body = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| truncated("segment body"))?;
        self.pos = end;
        Ok(body)
    }

    /// Read markers up to the next frame, scan or end of image. Application
    /// and comment segments are skipped.
    pub(crate) fn next_segment(&mut self) -> Result<Segment, DecodeError> {
        loop {
            if self.byte()? != 0xFF {
                return Err(DecodeError::CorruptedData(format!(
                    "expected marker at offset {}",
                    self.pos - 1
                )));
            }
            let mut code = self.byte()?;
            // Fill bytes
            while code == 0xFF {
                code = self.byte()?;
            }

            match code {
                SOF55 => {
                    let body = self.segment_body()?;
                    let frame = parse_frame(body)?;
                    if !self.frame_ids.is_empty() {
                        return Err(DecodeError::CorruptedData("second frame header".into()));
                    }
                    self.frame_ids = frame.component_ids.clone();
                    return Ok(Segment::Frame(frame));
                }
                SOS => {
                    let body = self.segment_body()?;
                    return parse_scan(body, &self.frame_ids).map(Segment::Scan);
                }
                EOI => return Ok(Segment::End),
                0xE0..=0xEF | COM => {
                    self.segment_body()?;
                }
                LSE => return Err(DecodeError::Unsupported("preset coding parameters".into())),
                DRI => return Err(DecodeError::Unsupported("restart intervals".into())),
                0xC0..=0xCF => return Err(DecodeError::InvalidFormat),
                other => {
                    return Err(DecodeError::CorruptedData(format!(
                        "unexpected marker 0xFF{other:02X}"
                    )))
                }
            }
        }
    }

    /// Entropy-coded data following the last scan header.
    pub(crate) fn scan_data(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Skip past a scan whose decoder consumed `consumed` bytes, stopping at
    /// the next marker.
    pub(crate) fn finish_scan(&mut self, consumed: usize) -> Result<(), DecodeError> {
        let start = self.pos + consumed.saturating_sub(1);
        let rest = self.data.get(start..).unwrap_or_default();
        let offset = rest
            .windows(2)
            .position(|pair| pair[0] == 0xFF && pair[1] >= 0x80)
            .ok_or_else(|| truncated("scan data"))?;
        self.pos = start + offset;
        Ok(())
    }
}

fn truncated(what: &str) -> DecodeError {
    DecodeError::CorruptedData(format!("truncated {what}"))
}

fn parse_frame(body: &[u8]) -> Result<FrameHeader, DecodeError> {
    if body.len() < 6 {
        return Err(truncated("frame header"));
    }
    let precision = body[0];
    let height = u32::from(u16::from_be_bytes([body[1], body[2]]));
    let width = u32::from(u16::from_be_bytes([body[3], body[4]]));
    let count = usize::from(body[5]);

    if precision != PRECISION {
        return Err(DecodeError::Unsupported(format!("{precision}-bit samples")));
    }
    if height == 0 {
        return Err(DecodeError::Unsupported("height defined by DNL".into()));
    }
    if width == 0 {
        return Err(DecodeError::CorruptedData("zero frame width".into()));
    }
    if !matches!(count, 1 | 3 | 4) {
        return Err(DecodeError::Unsupported(format!("{count} components")));
    }
    if body.len() != 6 + 3 * count {
        return Err(DecodeError::CorruptedData("frame header length mismatch".into()));
    }

    let mut component_ids = Vec::with_capacity(count);
    for field in body[6..].chunks_exact(3) {
        if field[1] != 0x11 {
            return Err(DecodeError::Unsupported("subsampled components".into()));
        }
        if component_ids.contains(&field[0]) {
            return Err(DecodeError::CorruptedData("duplicate component id".into()));
        }
        component_ids.push(field[0]);
    }

    Ok(FrameHeader {
        width,
        height,
        component_ids,
    })
}

fn parse_scan(body: &[u8], frame_ids: &[u8]) -> Result<ScanHeader, DecodeError> {
    if frame_ids.is_empty() {
        return Err(DecodeError::CorruptedData("scan before frame header".into()));
    }
    let count = usize::from(*body.first().ok_or_else(|| truncated("scan header"))?);
    if count == 0 || count > frame_ids.len() || body.len() != 4 + 2 * count {
        return Err(DecodeError::CorruptedData("malformed scan header".into()));
    }

    let mut components = Vec::with_capacity(count);
    for field in body[1..1 + 2 * count].chunks_exact(2) {
        let channel = frame_ids
            .iter()
            .position(|&id| id == field[0])
            .ok_or_else(|| DecodeError::CorruptedData(format!("unknown component {}", field[0])))?;
        if field[1] != 0 {
            return Err(DecodeError::Unsupported("mapping tables".into()));
        }
        components.push(channel);
    }

    let tail = &body[1 + 2 * count..];
    let (near, ilv, transform) = (tail[0], tail[1], tail[2]);
    if near != 0 {
        return Err(DecodeError::Unsupported(format!("near-lossless coding (NEAR={near})")));
    }
    if transform != 0 {
        return Err(DecodeError::Unsupported("point transform".into()));
    }
    let mode = InterleaveMode::from_ilv(ilv)
        .ok_or_else(|| DecodeError::CorruptedData(format!("invalid interleave mode {ilv}")))?;
    if mode == InterleaveMode::None && count > 1 {
        return Err(DecodeError::CorruptedData(
            "non-interleaved scan with several components".into(),
        ));
    }

    Ok(ScanHeader { components, mode })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_stream(components: u8, mode: InterleaveMode, scan: &[usize]) -> Vec<u8> {
        let mut out = Vec::new();
        write_start_of_image(&mut out);
        write_frame_header(&mut out, 640, 480, components);
        write_scan_header(&mut out, scan, mode);
        out
    }

    #[test]
    fn test_frame_header_layout() {
        let mut out = Vec::new();
        write_frame_header(&mut out, 0x0102, 0x0304, 3);
        assert_eq!(
            out,
            vec![
                0xFF, 0xF7, 0x00, 0x11, 8, 0x03, 0x04, 0x01, 0x02, 3, 1, 0x11, 0, 2, 0x11, 0, 3,
                0x11, 0
            ]
        );
    }

    #[test]
    fn test_headers_parse_back() {
        let stream = header_stream(3, InterleaveMode::Sample, &[0, 1, 2]);
        let mut reader = MarkerReader::new(&stream).unwrap();

        match reader.next_segment().unwrap() {
            Segment::Frame(frame) => {
                assert_eq!((frame.width, frame.height), (640, 480));
                assert_eq!(frame.component_ids, vec![1, 2, 3]);
            }
            other => panic!("expected frame, got {other:?}"),
        }
        match reader.next_segment().unwrap() {
            Segment::Scan(scan) => {
                assert_eq!(scan.components, vec![0, 1, 2]);
                assert_eq!(scan.mode, InterleaveMode::Sample);
            }
            other => panic!("expected scan, got {other:?}"),
        }
        assert!(reader.scan_data().is_empty());
    }

    #[test]
    fn test_skips_application_and_comment_segments() {
        let mut stream = Vec::new();
        write_start_of_image(&mut stream);
        stream.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x04, b'h', b'i']);
        stream.extend_from_slice(&[0xFF, 0xFE, 0x00, 0x03, b'!']);
        write_frame_header(&mut stream, 2, 2, 1);
        write_end_of_image(&mut stream);

        let mut reader = MarkerReader::new(&stream).unwrap();
        assert!(matches!(reader.next_segment(), Ok(Segment::Frame(_))));
        assert!(matches!(reader.next_segment(), Ok(Segment::End)));
    }

    #[test]
    fn test_rejects_non_jpegls_streams() {
        assert_eq!(
            MarkerReader::new(b"\x89PNG").unwrap_err(),
            DecodeError::InvalidFormat
        );

        // Baseline JPEG frame
        let stream = [0xFF, 0xD8, 0xFF, 0xC0, 0x00, 0x0B];
        let mut reader = MarkerReader::new(&stream).unwrap();
        assert_eq!(reader.next_segment().unwrap_err(), DecodeError::InvalidFormat);
    }

    #[test]
    fn test_rejects_near_lossless_and_presets() {
        let mut stream = header_stream(1, InterleaveMode::None, &[0]);
        // NEAR byte sits three bytes from the end of the scan header
        let near = stream.len() - 3;
        stream[near] = 2;
        let mut reader = MarkerReader::new(&stream).unwrap();
        reader.next_segment().unwrap();
        assert!(matches!(reader.next_segment(), Err(DecodeError::Unsupported(_))));

        let stream = [0xFF, 0xD8, 0xFF, 0xF8, 0x00, 0x03, 0x01];
        let mut reader = MarkerReader::new(&stream).unwrap();
        assert!(matches!(reader.next_segment(), Err(DecodeError::Unsupported(_))));
    }

    #[test]
    fn test_rejects_unsupported_precision() {
        let mut stream = Vec::new();
        write_start_of_image(&mut stream);
        write_frame_header(&mut stream, 4, 4, 1);
        stream[6] = 12;
        let mut reader = MarkerReader::new(&stream).unwrap();
        assert!(matches!(reader.next_segment(), Err(DecodeError::Unsupported(_))));
    }

    #[test]
    fn test_scan_requires_frame() {
        let mut stream = Vec::new();
        write_start_of_image(&mut stream);
        write_scan_header(&mut stream, &[0], InterleaveMode::None);
        let mut reader = MarkerReader::new(&stream).unwrap();
        assert!(matches!(reader.next_segment(), Err(DecodeError::CorruptedData(_))));
    }

    #[test]
    fn test_finish_scan_finds_next_marker() {
        let mut stream = header_stream(1, InterleaveMode::None, &[0]);
        let scan_start = stream.len();
        // Stuffed 0xFF inside data must not be taken for a marker
        stream.extend_from_slice(&[0x12, 0xFF, 0x7F, 0x00]);
        write_end_of_image(&mut stream);

        let mut reader = MarkerReader::new(&stream).unwrap();
        reader.next_segment().unwrap();
        reader.next_segment().unwrap();
        assert_eq!(reader.scan_data().len(), stream.len() - scan_start);
        reader.finish_scan(1).unwrap();
        assert!(matches!(reader.next_segment(), Ok(Segment::End)));
    }
}

// 视频墙 - MJPEG编解码
//
// 本模块包含两部分：
//
// - `JpegDemuxer`: 从转码进程的原始输出中按SOI/EOI标记切出完整JPEG帧
// - `MultipartEncoder`: 将JPEG帧封装为 multipart/x-mixed-replace 分段
//
// 输出块的边界是任意的，不携带语义。

use bytes::{Bytes, BytesMut};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::io;
use tracing::warn;

/// JPEG起始标记 (SOI)
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG结束标记 (EOI)
pub const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// 默认的multipart分隔符
pub const DEFAULT_BOUNDARY: &str = "myboundary";

/// 默认单帧最大字节数
pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// 跨块帧的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemuxMode {
    /// 缓存不完整的帧，用后续块拼接
    #[default]
    Stitch,
    /// 每个块独立处理，块内没有结束标记的帧片段直接丢弃
    DropPartial,
}

/// 帧解复用统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStats {
    pub frames: u64,
    pub discarded_fragments: u64,
}

/// JPEG帧解复用器
///
/// 惰性、不可重启：每次 `push` 返回本块内（以及拼接后）完成的所有帧，按出现顺序。
#[derive(Debug)]
pub struct JpegDemuxer {
    mode: DemuxMode,
    max_frame_bytes: usize,
    /// 待处理字节：要么为空，要么以SOI开头（帧进行中），要么是单个0xFF（可能被切开的SOI）
    pending: BytesMut,
    in_frame: bool,
    /// 下次查找EOI的起始偏移
    scan_from: usize,
    stats: DemuxStats,
}

impl JpegDemuxer {
    pub fn new(mode: DemuxMode) -> Self {
        Self::with_limit(mode, DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_limit(mode: DemuxMode, max_frame_bytes: usize) -> Self {
        Self {
            mode,
            max_frame_bytes: max_frame_bytes.max(JPEG_SOI.len() + JPEG_EOI.len()),
            pending: BytesMut::new(),
            in_frame: false,
            scan_from: 0,
            stats: DemuxStats::default(),
        }
    }

    pub fn stats(&self) -> DemuxStats {
        self.stats
    }

    /// 当前缓存的未完成字节数
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// 输入一个输出块，返回所有完成的帧
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        match self.mode {
            DemuxMode::Stitch => self.push_stitched(chunk),
            DemuxMode::DropPartial => self.push_chunk_local(chunk),
        }
    }

    fn push_stitched(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        let mut frames = Vec::new();
        self.pending.extend_from_slice(chunk);

        loop {
            if !self.in_frame {
                match find_marker(&self.pending, JPEG_SOI, 0) {
                    Some(start) => {
                        let _ = self.pending.split_to(start);
                        self.in_frame = true;
                        self.scan_from = JPEG_SOI.len();
                    }
                    None => {
                        // 仅保留可能是SOI前半部分的0xFF
                        let keep_tail = self.pending.last() == Some(&JPEG_SOI[0]);
                        self.pending.clear();
                        if keep_tail {
                            self.pending.extend_from_slice(&JPEG_SOI[..1]);
                        }
                        break;
                    }
                }
            }

            match find_marker(&self.pending, JPEG_EOI, self.scan_from) {
                Some(end) => {
                    let frame = self.pending.split_to(end + JPEG_EOI.len()).freeze();
                    self.in_frame = false;
                    self.scan_from = 0;
                    self.stats.frames += 1;
                    frames.push(frame);
                }
                None => {
                    if self.pending.len() > self.max_frame_bytes {
                        warn!(
                            "Discarding unterminated JPEG fragment of {} bytes (limit {})",
                            self.pending.len(),
                            self.max_frame_bytes
                        );
                        self.pending.clear();
                        self.in_frame = false;
                        self.scan_from = 0;
                        self.stats.discarded_fragments += 1;
                    } else {
                        // EOI可能跨块，回退一个字节
                        self.scan_from = self.pending.len().saturating_sub(1).max(JPEG_SOI.len());
                    }
                    break;
                }
            }
        }

        frames
    }

    fn push_chunk_local(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        let mut frames = Vec::new();
        let mut cursor = 0;

        while let Some(start) = find_marker(chunk, JPEG_SOI, cursor) {
            match find_marker(chunk, JPEG_EOI, start + JPEG_SOI.len()) {
                Some(end) => {
                    let end = end + JPEG_EOI.len();
                    frames.push(Bytes::copy_from_slice(&chunk[start..end]));
                    self.stats.frames += 1;
                    cursor = end;
                }
                None => {
                    self.stats.discarded_fragments += 1;
                    break;
                }
            }
        }

        frames
    }
}

impl Default for JpegDemuxer {
    fn default() -> Self {
        Self::new(DemuxMode::default())
    }
}

fn find_marker(haystack: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(marker.len())
        .position(|window| window == marker)
        .map(|pos| pos + from)
}

/// 将输出块流转换为帧流
pub fn frame_stream<S>(chunks: S, mut demuxer: JpegDemuxer) -> impl Stream<Item = io::Result<Bytes>>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    async_stream::try_stream! {
        futures::pin_mut!(chunks);
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            for frame in demuxer.push(&chunk) {
                yield frame;
            }
        }
    }
}

/// 诊断输出中表示失败的关键字（仅用于日志）
const DIAGNOSTIC_FAILURE_MARKERS: [&str; 3] = ["error", "failed", "Invalid"];

/// 判断转码进程的诊断输出是否值得记录
pub fn is_diagnostic_failure(text: &str) -> bool {
    DIAGNOSTIC_FAILURE_MARKERS
        .iter()
        .any(|marker| text.contains(marker))
}

/// multipart/x-mixed-replace 帧编码器
#[derive(Debug, Clone)]
pub struct MultipartEncoder {
    boundary: String,
}

impl MultipartEncoder {
    pub fn new(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
        }
    }

    /// 响应头 Content-Type 的值
    pub fn content_type(&self) -> String {
        format!("multipart/x-mixed-replace; boundary=--{}", self.boundary)
    }

    /// 编码一帧：`\r\n--<boundary>\r\nContent-Type: image/jpeg\r\nContent-Length: <N>\r\n\r\n<帧>\r\n`
    pub fn encode(&self, frame: &[u8]) -> Bytes {
        let header = format!(
            "\r\n--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            self.boundary,
            frame.len()
        );

        let mut part = BytesMut::with_capacity(header.len() + frame.len() + 2);
        part.extend_from_slice(header.as_bytes());
        part.extend_from_slice(frame);
        part.extend_from_slice(b"\r\n");
        part.freeze()
    }
}

impl Default for MultipartEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_BOUNDARY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn jpeg(fill: u8, body_len: usize) -> Vec<u8> {
        let mut frame = JPEG_SOI.to_vec();
        frame.extend(std::iter::repeat(fill).take(body_len));
        frame.extend_from_slice(&JPEG_EOI);
        frame
    }

    #[test]
    fn test_frames_separated_by_padding() {
        let frames: Vec<Vec<u8>> = (0..5u8).map(|i| jpeg(i + 1, 10 + i as usize)).collect();
        let mut input = Vec::new();
        for frame in &frames {
            input.extend_from_slice(b"padding");
            input.extend_from_slice(frame);
        }
        input.extend_from_slice(b"trailer");

        for mode in [DemuxMode::Stitch, DemuxMode::DropPartial] {
            let mut demuxer = JpegDemuxer::new(mode);
            let out = demuxer.push(&input);
            assert_eq!(out.len(), frames.len(), "mode {:?}", mode);
            for (got, want) in out.iter().zip(&frames) {
                assert_eq!(got.as_ref(), want.as_slice());
            }
        }
    }

    #[test]
    fn test_straddling_frame_is_stitched() {
        let frame = jpeg(0x42, 64);
        let (first, second) = frame.split_at(30);

        let mut demuxer = JpegDemuxer::new(DemuxMode::Stitch);
        assert!(demuxer.push(first).is_empty());
        assert_eq!(demuxer.pending_len(), 30);

        let out = demuxer.push(second);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref(), frame.as_slice());
        assert_eq!(demuxer.pending_len(), 0);
    }

    #[test]
    fn test_straddling_frame_is_dropped_in_chunk_local_mode() {
        let frame = jpeg(0x42, 64);
        let next = jpeg(0x43, 8);
        let (first, second) = frame.split_at(30);
        let mut tail = second.to_vec();
        tail.extend_from_slice(&next);

        let mut demuxer = JpegDemuxer::new(DemuxMode::DropPartial);
        assert!(demuxer.push(first).is_empty());
        let out = demuxer.push(&tail);

        // 只剩下一块内完整的帧
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref(), next.as_slice());
        assert_eq!(demuxer.stats().discarded_fragments, 1);
    }

    #[test]
    fn test_markers_split_across_chunks() {
        let frame = jpeg(0x11, 16);

        // SOI被切开
        let mut demuxer = JpegDemuxer::new(DemuxMode::Stitch);
        let mut first = b"junk".to_vec();
        first.push(0xFF);
        assert!(demuxer.push(&first).is_empty());
        let out = demuxer.push(&frame[1..]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref(), frame.as_slice());

        // EOI被切开
        let mut demuxer = JpegDemuxer::new(DemuxMode::Stitch);
        let split = frame.len() - 1;
        assert!(demuxer.push(&frame[..split]).is_empty());
        let out = demuxer.push(&frame[split..]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref(), frame.as_slice());
    }

    #[test]
    fn test_many_small_chunks() {
        let frames: Vec<Vec<u8>> = (0..3u8).map(|i| jpeg(0x20 + i, 40)).collect();
        let input: Vec<u8> = frames.concat();

        let mut demuxer = JpegDemuxer::new(DemuxMode::Stitch);
        let mut out = Vec::new();
        for chunk in input.chunks(7) {
            out.extend(demuxer.push(chunk));
        }
        assert_eq!(out.len(), 3);
        for (got, want) in out.iter().zip(&frames) {
            assert_eq!(got.as_ref(), want.as_slice());
        }
    }

    #[test]
    fn test_oversized_fragment_is_discarded() {
        let mut demuxer = JpegDemuxer::with_limit(DemuxMode::Stitch, 16);
        let mut runaway = JPEG_SOI.to_vec();
        runaway.extend(std::iter::repeat(0x00).take(32));
        assert!(demuxer.push(&runaway).is_empty());
        assert_eq!(demuxer.pending_len(), 0);
        assert_eq!(demuxer.stats().discarded_fragments, 1);

        let frame = jpeg(0x01, 4);
        let out = demuxer.push(&frame);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref(), frame.as_slice());
    }

    #[test]
    fn test_encode_matches_template() {
        let encoder = MultipartEncoder::default();
        let frame = jpeg(0x55, 3);
        let encoded = encoder.encode(&frame);

        let mut expected =
            b"\r\n--myboundary\r\nContent-Type: image/jpeg\r\nContent-Length: 7\r\n\r\n".to_vec();
        expected.extend_from_slice(&frame);
        expected.extend_from_slice(b"\r\n");
        assert_eq!(encoded.as_ref(), expected.as_slice());
        assert_eq!(
            encoder.content_type(),
            "multipart/x-mixed-replace; boundary=--myboundary"
        );
    }

    #[test]
    fn test_diagnostic_markers() {
        assert!(is_diagnostic_failure("Connection failed"));
        assert!(is_diagnostic_failure("Invalid data found when processing input"));
        assert!(is_diagnostic_failure("rtsp: error while decoding"));
        assert!(!is_diagnostic_failure("frame=  100 fps=8.0"));
    }

    #[tokio::test]
    async fn test_frame_stream_over_chunks() {
        let frame_a = jpeg(0x0A, 20);
        let frame_b = jpeg(0x0B, 20);
        let input = [frame_a.clone(), frame_b.clone()].concat();
        let chunks: Vec<io::Result<Bytes>> = input
            .chunks(9)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        let frames: Vec<Bytes> = frame_stream(stream::iter(chunks), JpegDemuxer::default())
            .map(|r| r.unwrap())
            .collect()
            .await;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref(), frame_a.as_slice());
        assert_eq!(frames[1].as_ref(), frame_b.as_slice());
    }
}

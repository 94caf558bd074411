//! Punctuation-driven text segmenter
//!
//! Characters accumulate until a clause or sentence separator arrives. The
//! chunk is emitted only when it is longer than the current minimum, and the
//! minimum grows after every emission: the first segment reaches the
//! synthesizer quickly, later ones get coarser.

use voice_turn_config::constants::speech::{SEGMENT_GROWTH_CHARS, SEGMENT_MIN_CHARS, SEPARATORS};

/// Incremental segmenter for streamed text
#[derive(Debug, Clone)]
pub struct TextSegmenter {
    separators: Vec<char>,
    min_chars: usize,
    growth: usize,
    chunk: String,
    chunk_chars: usize,
}

impl Default for TextSegmenter {
    fn default() -> Self {
        Self::new(SEPARATORS.to_vec(), SEGMENT_MIN_CHARS, SEGMENT_GROWTH_CHARS)
    }
}

impl TextSegmenter {
    pub fn new(separators: Vec<char>, min_chars: usize, growth: usize) -> Self {
        Self {
            separators,
            min_chars,
            growth,
            chunk: String::new(),
            chunk_chars: 0,
        }
    }

    /// Current minimum segment length (chars, exclusive)
    pub fn min_chars(&self) -> usize {
        self.min_chars
    }

    /// Feed a text delta, returning any completed segments
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        let mut segments = Vec::new();
        for c in delta.chars() {
            self.chunk.push(c);
            self.chunk_chars += 1;
            if self.separators.contains(&c) && self.chunk_chars > self.min_chars {
                self.min_chars += self.growth;
                self.chunk_chars = 0;
                segments.push(std::mem::take(&mut self.chunk));
            }
        }
        segments
    }

    /// Flush the unterminated tail
    pub fn finish(&mut self) -> Option<String> {
        self.chunk_chars = 0;
        if self.chunk.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.chunk))
        }
    }
}

/// Segment a complete text in one pass
pub fn split_text(text: &str) -> Vec<String> {
    let mut segmenter = TextSegmenter::default();
    let mut segments = segmenter.push(text);
    segments.extend(segmenter.finish());
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_segment_is_short() {
        let segments = split_text("好的，我来帮你查询一下今天北京的天气情况，请稍等。");
        assert_eq!(segments[0], "好的，我来帮你查询一下今天北京的天气情况，");
        assert_eq!(segments[1], "请稍等。");
    }

    #[test]
    fn test_short_clauses_merge() {
        // "好，" is only 2 chars, not above the minimum of 3
        let segments = split_text("好，没问题，马上开始。");
        assert_eq!(segments, vec!["好，没问题，".to_string(), "马上开始。".to_string()]);
    }

    #[test]
    fn test_concatenation_reproduces_input() {
        let inputs = [
            "",
            "没有标点的一段话",
            "今天天气晴，气温25度，适合出门！你想去哪里？我可以帮你规划路线；也可以推荐餐厅、景点……",
            "Hello, world! How are you? Fine; thanks.",
            "，，，。。。",
        ];
        for input in inputs {
            assert_eq!(split_text(input).concat(), input);
        }
    }

    #[test]
    fn test_streamed_deltas_match_batch() {
        let text = "北京今天晴转多云，最高气温二十八度，最低气温十九度，东南风三级，空气质量良。";
        let mut streamed = Vec::new();
        let mut segmenter = TextSegmenter::default();
        let chars: Vec<char> = text.chars().collect();
        for piece in chars.chunks(3) {
            streamed.extend(segmenter.push(&piece.iter().collect::<String>()));
        }
        streamed.extend(segmenter.finish());
        assert_eq!(streamed, split_text(text));
    }

    #[test]
    fn test_threshold_grows_by_ten() {
        let mut segmenter = TextSegmenter::default();
        assert_eq!(segmenter.min_chars(), 3);
        let mut previous = segmenter.min_chars();
        let text = "一二三四，".repeat(20);
        for segment in segmenter.push(&text) {
            assert!(segment.chars().count() > previous);
            assert_eq!(segmenter.min_chars() % 10, 3);
            previous += 10;
        }
        assert!(segmenter.min_chars() > 3);
    }
}

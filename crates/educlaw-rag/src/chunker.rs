//! Section-aware text chunker with word-level overlap.
//!
//! Splits lesson text into bounded fragments for embedding. Deterministic:
//! the same input always yields the same chunks, which keeps re-indexing
//! reproducible and lets the embedding cache absorb repeat work.

/// Sentence-ending delimiters across the scripts we index. Vietnamese uses
/// Latin punctuation; CJK marks cover mixed-language material.
const SENTENCE_DELIMITERS: &[char] = &['.', '!', '?', '…', '。', '！', '？'];

/// Sentences below this length never trigger a flush on their own.
const MIN_SENTENCE_CHARS: usize = 10;

/// Emitted chunks below this length are dropped outright.
const MIN_CHUNK_CHARS: usize = 20;

#[derive(Debug, Clone)]
pub struct Chunker {
    /// Soft maximum chunk length in characters.
    pub target_size: usize,
    /// Words carried from the end of one chunk into the next.
    pub overlap_words: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self { target_size: 500, overlap_words: 10 }
    }
}

impl Chunker {
    pub fn new(target_size: usize, overlap_words: usize) -> Self {
        Self { target_size, overlap_words }
    }

    /// Split `text` into ordered chunks. Heading lines start a new section,
    /// and chunks never span a section boundary.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        for section in split_sections(text) {
            self.chunk_section(&section, &mut chunks);
        }
        chunks.retain(|c| c.chars().count() >= MIN_CHUNK_CHARS);
        chunks
    }

    fn chunk_section(&self, section: &str, chunks: &mut Vec<String>) {
        let mut buffer = String::new();
        // Whether the buffer holds anything beyond the overlap seed.
        let mut fresh = false;

        for sentence in split_sentences(section) {
            let sentence_chars = sentence.chars().count();
            let would_be = if buffer.is_empty() {
                sentence_chars
            } else {
                buffer.chars().count() + 1 + sentence_chars
            };

            // Tiny sentences merge unconditionally so list fragments and
            // stray abbreviations never stand alone.
            if would_be <= self.target_size || sentence_chars < MIN_SENTENCE_CHARS {
                push_sentence(&mut buffer, &sentence);
                fresh = true;
                continue;
            }

            if fresh {
                let overlap = tail_words(&buffer, self.overlap_words);
                chunks.push(std::mem::take(&mut buffer));
                buffer = overlap;
                fresh = false;
            }

            if sentence_chars > self.target_size {
                // No delimiter inside: hard slice so no chunk grows without
                // bound. The first slice absorbs any pending overlap seed.
                for piece in hard_slice(&sentence, self.target_size) {
                    if buffer.is_empty() {
                        chunks.push(piece);
                    } else {
                        push_sentence(&mut buffer, &piece);
                        chunks.push(std::mem::take(&mut buffer));
                    }
                }
                if let Some(last) = chunks.last() {
                    buffer = tail_words(last, self.overlap_words);
                }
                fresh = false;
            } else {
                push_sentence(&mut buffer, &sentence);
                fresh = true;
            }
        }

        if fresh && !buffer.trim().is_empty() {
            chunks.push(buffer.trim().to_string());
        }
    }
}

fn push_sentence(buffer: &mut String, sentence: &str) {
    if !buffer.is_empty() {
        buffer.push(' ');
    }
    buffer.push_str(sentence);
}

/// Last `n` whitespace-separated words of `text`.
fn tail_words(text: &str, n: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= n {
        return words.join(" ");
    }
    words[words.len() - n..].join(" ")
}

/// Split on markdown-style heading lines; each heading stays with the
/// section it opens.
fn split_sections(text: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.trim_start().starts_with('#') && !current.trim().is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current);
    }
    sections
}

/// Split a section into sentence-like units. Delimiters attach to the
/// sentence they close; bare newlines also end a unit so list items do not
/// glue together. Runs of trailing delimiters ("...", "?!") collapse onto
/// the preceding sentence.
fn split_sentences(section: &str) -> Vec<String> {
    let mut sentences: Vec<String> = Vec::new();
    let mut current = String::new();

    let mut flush = |current: &mut String, sentences: &mut Vec<String>| {
        let unit = current.trim();
        if !unit.is_empty() {
            if unit.chars().all(|c| SENTENCE_DELIMITERS.contains(&c)) {
                if let Some(prev) = sentences.last_mut() {
                    prev.push_str(unit);
                } else {
                    sentences.push(unit.to_string());
                }
            } else {
                sentences.push(unit.to_string());
            }
        }
        current.clear();
    };

    for ch in section.chars() {
        if ch == '\n' {
            flush(&mut current, &mut sentences);
            continue;
        }
        current.push(ch);
        if SENTENCE_DELIMITERS.contains(&ch) {
            flush(&mut current, &mut sentences);
        }
    }
    flush(&mut current, &mut sentences);

    sentences
}

/// Slice an unsplittable run into target-sized pieces, preferring word
/// boundaries and falling back to char boundaries inside one long token.
fn hard_slice(text: &str, target: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let word_chars = word.chars().count();

        if word_chars > target {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            let mut slice = String::new();
            let mut count = 0;
            for ch in word.chars() {
                slice.push(ch);
                count += 1;
                if count == target {
                    pieces.push(std::mem::take(&mut slice));
                    count = 0;
                }
            }
            if !slice.is_empty() {
                current = slice;
            }
            continue;
        }

        let would_be = if current.is_empty() {
            word_chars
        } else {
            current.chars().count() + 1 + word_chars
        };
        if would_be > target && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }

    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

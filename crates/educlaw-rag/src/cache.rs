//! Answer cache with TTL expiry and hit-frequency eviction.
//!
//! Keys are normalized so trivially different phrasings of the same
//! question share one entry. Under capacity pressure the least-reused
//! entries go first, not the oldest.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Scope sentinel for unscoped questions.
const GLOBAL_SCOPE: &str = "global";

/// Share of entries dropped when the cache is full.
const EVICT_FRACTION: f64 = 0.2;

#[derive(Debug, Clone)]
struct AnswerEntry {
    answer: String,
    created_at: Instant,
    hits: u32,
}

/// Counters exposed for logs and the CLI stats command.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired: u64,
    pub entries: usize,
}

pub struct AnswerCache {
    entries: Mutex<HashMap<String, AnswerEntry>>,
    ttl: Duration,
    max_entries: usize,
    min_confidence: u8,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired: AtomicU64,
}

impl AnswerCache {
    pub fn new(max_entries: usize, ttl: Duration, min_confidence: u8) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
            min_confidence,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    /// Build the cache key for a question and optional lesson scope.
    pub fn cache_key(question: &str, scope: Option<&str>) -> String {
        format!("{}::{}", scope.unwrap_or(GLOBAL_SCOPE), normalize_question(question))
    }

    /// Look up an answer; expired entries are removed on the spot.
    pub async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(entry) if entry.created_at.elapsed() < self.ttl => {
                entry.hits += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.answer.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.expired.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store an answer if its confidence clears the write threshold.
    pub async fn set(&self, key: &str, answer: &str, confidence: u8) {
        if confidence < self.min_confidence {
            tracing::debug!(
                "Answer confidence {} below cache threshold {}, not cached",
                confidence,
                self.min_confidence
            );
            return;
        }

        let mut entries = self.entries.lock().await;
        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            self.evict_low_traffic(&mut entries);
        }
        entries.insert(
            key.to_string(),
            AnswerEntry { answer: answer.to_string(), created_at: Instant::now(), hits: 0 },
        );
    }

    /// Drop the least-reused ~20% of entries, oldest first among ties.
    fn evict_low_traffic(&self, entries: &mut HashMap<String, AnswerEntry>) {
        let evict_count = ((entries.len() as f64 * EVICT_FRACTION).ceil() as usize).max(1);
        let mut ranked: Vec<(String, u32, Instant)> =
            entries.iter().map(|(k, e)| (k.clone(), e.hits, e.created_at)).collect();
        ranked.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)));
        for (key, _, _) in ranked.into_iter().take(evict_count) {
            entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        tracing::debug!("Answer cache evicted {evict_count} low-traffic entries");
    }

    /// Active TTL sweep; returns how many entries were dropped.
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, e| e.created_at.elapsed() < self.ttl);
        let dropped = before - entries.len();
        if dropped > 0 {
            self.expired.fetch_add(dropped as u64, Ordering::Relaxed);
            tracing::debug!("Answer cache sweep dropped {dropped} expired entries");
        }
        dropped
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            entries: self.entries.lock().await.len(),
        }
    }
}

/// Normalize a question for key derivation: lowercase, collapse whitespace,
/// strip terminal punctuation, fold Vietnamese diacritics to ASCII.
pub fn normalize_question(question: &str) -> String {
    let lowered = question.to_lowercase();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    let stripped = collapsed
        .trim_end_matches(['?', '!', '.', '…', '。', '？', '！'])
        .trim_end();
    stripped.chars().map(fold_char).collect()
}

/// Fold one lowercase Vietnamese character to its base ASCII letter.
fn fold_char(c: char) -> char {
    match c {
        'à' | 'á' | 'ả' | 'ã' | 'ạ' | 'ă' | 'ằ' | 'ắ' | 'ẳ' | 'ẵ' | 'ặ' | 'â' | 'ầ' | 'ấ'
        | 'ẩ' | 'ẫ' | 'ậ' => 'a',
        'è' | 'é' | 'ẻ' | 'ẽ' | 'ẹ' | 'ê' | 'ề' | 'ế' | 'ể' | 'ễ' | 'ệ' => 'e',
        'ì' | 'í' | 'ỉ' | 'ĩ' | 'ị' => 'i',
        'ò' | 'ó' | 'ỏ' | 'õ' | 'ọ' | 'ô' | 'ồ' | 'ố' | 'ổ' | 'ỗ' | 'ộ' | 'ơ' | 'ờ' | 'ớ'
        | 'ở' | 'ỡ' | 'ợ' => 'o',
        'ù' | 'ú' | 'ủ' | 'ũ' | 'ụ' | 'ư' | 'ừ' | 'ứ' | 'ử' | 'ữ' | 'ự' => 'u',
        'ỳ' | 'ý' | 'ỷ' | 'ỹ' | 'ỵ' => 'y',
        'đ' => 'd',
        other => other,
    }
}

//! 同名字幕自动匹配。

use crate::drive::FileEntry;

const SUBTITLE_EXTENSIONS: [&str; 3] = ["srt", "vtt", "ass"];

pub fn is_subtitle(entry: &FileEntry) -> bool {
    let ext = entry.ext();
    SUBTITLE_EXTENSIONS.iter().any(|candidate| ext.contains(candidate))
}

/// 在候选字幕中选出与视频名编辑距离最小的一个，距离相同时取最先出现者。
pub fn pick_subtitle<'a>(video_name: &str, candidates: &'a [FileEntry]) -> Option<&'a FileEntry> {
    let mut best: Option<(usize, &FileEntry)> = None;
    for candidate in candidates.iter().filter(|entry| is_subtitle(entry)) {
        let distance = levenshtein(video_name, &candidate.name);
        if best.is_none_or(|(min, _)| distance < min) {
            best = Some((distance, candidate));
        }
    }
    best.map(|(_, entry)| entry)
}

/// 按字符计算的编辑距离，只保留一行滚动数组。
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b_chars.len();
    }
    let mut row: Vec<usize> = (0..=b_chars.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let above = row[j + 1];
            let cost = usize::from(ca != *cb);
            row[j + 1] = (above + 1).min(row[j] + 1).min(diagonal + cost);
            diagonal = above;
        }
    }
    row[b_chars.len()]
}

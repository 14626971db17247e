//! Argument grammar of song-request style commands:
//! `!sr <code> [difficulty] [m:ss | m:ss-m:ss]`.

use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Difficulty {
    Easy,
    Normal,
    Hard,
    Expert,
    ExpertPlus,
}

impl Difficulty {
    /// Match a chat token against the accepted aliases.
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "easy" | "ez" => Some(Difficulty::Easy),
            "normal" | "n" => Some(Difficulty::Normal),
            "hard" | "h" => Some(Difficulty::Hard),
            "expert" | "ex" => Some(Difficulty::Expert),
            "expertplus" | "expert+" | "ex+" | "e+" => Some(Difficulty::ExpertPlus),
            _ => None,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Easy => write!(f, "easy"),
            Difficulty::Normal => write!(f, "normal"),
            Difficulty::Hard => write!(f, "hard"),
            Difficulty::Expert => write!(f, "expert"),
            Difficulty::ExpertPlus => write!(f, "expertplus"),
        }
    }
}

/// A parsed song request. The code itself is only validated for shape,
/// never resolved against the catalog here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongRequest {
    pub code: String,
    pub difficulty: Option<Difficulty>,
    /// Where to start playing
    pub start: Option<Duration>,
    /// How long to play; `None` means "until the end"
    pub length: Option<Duration>,
}

/// Parse the full command text, e.g. `!sr 25f ex 1:20-2:10`.
///
/// Returns `None` when no usable code follows the command. Tokens after the
/// code that are neither a difficulty nor a valid time are ignored.
pub fn parse_song_request(text: &str) -> Option<SongRequest> {
    let mut tokens = text.split_whitespace().skip(1);
    let code = tokens.next()?;
    if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }

    let mut request = SongRequest {
        code: code.to_ascii_lowercase(),
        difficulty: None,
        start: None,
        length: None,
    };

    for token in tokens {
        if request.difficulty.is_none() {
            if let Some(difficulty) = Difficulty::parse(token) {
                request.difficulty = Some(difficulty);
                continue;
            }
        }
        if request.start.is_none() {
            if let Some((start, length)) = parse_time_range(token) {
                request.start = Some(start);
                request.length = length;
            }
        }
    }

    Some(request)
}

/// `m:ss` into a duration; seconds are exactly two digits in `[0, 60)`.
pub fn parse_time(token: &str) -> Option<Duration> {
    let (minutes, seconds) = token.split_once(':')?;
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(minutes) || !all_digits(seconds) || seconds.len() != 2 {
        return None;
    }
    let minutes: u64 = minutes.parse().ok()?;
    let seconds: u64 = seconds.parse().ok()?;
    if seconds >= 60 {
        return None;
    }
    minutes
        .checked_mul(60)?
        .checked_add(seconds)
        .map(Duration::from_secs)
}

/// A bare `m:ss` yields only a start; `m:ss-m:ss` yields start and length,
/// and is rejected unless the end is strictly after the start.
pub fn parse_time_range(token: &str) -> Option<(Duration, Option<Duration>)> {
    match token.split_once('-') {
        Some((start, end)) => {
            let start = parse_time(start)?;
            let end = parse_time(end)?;
            if end <= start {
                return None;
            }
            Some((start, Some(end - start)))
        }
        None => parse_time(token).map(|start| (start, None)),
    }
}

//! Bounded record of recently played songs.

use crate::model::Song;
use std::collections::VecDeque;

pub const DEFAULT_HISTORY_CAPACITY: usize = 8;

/// Fixed-capacity FIFO; the oldest entry is evicted once full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayHistory {
    songs: VecDeque<Song>,
    capacity: usize,
}

impl PlayHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            songs: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, song: Song) {
        if self.capacity == 0 {
            return;
        }
        if self.songs.len() >= self.capacity {
            self.songs.pop_front();
        }
        self.songs.push_back(song);
    }

    /// Most recently recorded song.
    pub fn last(&self) -> Option<&Song> {
        self.songs.back()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Song> {
        self.songs.iter()
    }

    pub fn contains(&self, song: &Song) -> bool {
        self.songs.iter().any(|entry| entry.same_track(song))
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for PlayHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(n: usize) -> Song {
        Song::new(format!("/music/{n}.mp3"), format!("{n}.mp3"), "---")
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut history = PlayHistory::new(3);
        for n in 0..5 {
            history.push(song(n));
        }

        let names: Vec<&str> = history.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["2.mp3", "3.mp3", "4.mp3"]);
        assert_eq!(history.last(), Some(&song(4)));
        assert_eq!(history.len(), 3);
        assert!(!history.contains(&song(1)));
        assert!(history.contains(&song(3)));
    }

    #[test]
    fn zero_capacity_records_nothing() {
        let mut history = PlayHistory::new(0);
        history.push(song(1));
        assert!(history.is_empty());
        assert_eq!(history.last(), None);
    }
}

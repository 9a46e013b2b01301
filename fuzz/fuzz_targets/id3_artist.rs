#![no_main]

use libfuzzer_sys::fuzz_target;
use qplayer::tags;

fuzz_target!(|data: &[u8]| {
    let artist = tags::parse_artist_from_reader(data);
    assert!(!artist.is_empty() || data.starts_with(b"ID3"));
});

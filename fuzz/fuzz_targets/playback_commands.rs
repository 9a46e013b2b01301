#![no_main]

use libfuzzer_sys::fuzz_target;
use qplayer::core::PlaybackState;
use qplayer::model::{LibraryResult, PlayingState, Song};
use rand::SeedableRng;
use rand::rngs::SmallRng;

fuzz_target!(|data: &[u8]| {
    let Some((&seed, commands)) = data.split_first() else {
        return;
    };
    let mut rng = SmallRng::seed_from_u64(u64::from(seed));
    let len = usize::from(seed % 16);
    let library: Vec<Song> = (0..len)
        .map(|idx| Song::new(format!("/music/{idx}.mp3"), format!("{idx}.mp3"), "---"))
        .collect();

    let mut state = PlaybackState::default().with_songs(LibraryResult::Loaded(library.clone()));

    for byte in commands {
        state = match byte % 8 {
            0 => state.start(library.clone(), None, &mut rng),
            1 => {
                let song = library.get(usize::from(*byte) % len.max(1)).cloned();
                state.start(library.clone(), song, &mut rng)
            }
            2 | 3 => state.next(&mut rng),
            4 => state.toggle_shuffle(!state.shuffle, &mut rng),
            5 => state.cycle_loop_state(),
            6 => state.toggle_playing_state(PlayingState::Paused, false),
            _ => state.toggle_playing_state(PlayingState::Stopped, true),
        };

        assert_eq!(state.play_order.len(), state.playlist.len());
        if let Some(playing) = &state.playing {
            assert!(state.play_order.iter().any(|song| song.same_track(playing)));
        }
        assert!(state.play_history.len() <= state.play_history.capacity());
    }
});

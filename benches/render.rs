// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use steptrack::audio::sample_source::MemorySampleSource;
use steptrack::audio::AudioCallback;
use steptrack::config;
use steptrack::pattern::{Event, COLUMNS, ROWS};
use steptrack::Engine;

const SAMPLE_RATE: u32 = 44100;
const BLOCK_SIZE: usize = 512;

fn generate_test_audio(duration_seconds: f32, sample_rate: u32) -> Vec<f32> {
    let num_samples = (duration_seconds * sample_rate as f32) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            0.3 * (2.0 * std::f32::consts::PI * 261.626 * t).sin()
        })
        .collect()
}

fn benchmark_engine_blocks(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_blocks");

    for voices in [0usize, 4, 16, 32] {
        let (engine, mut processor) = Engine::new(&config::Engine::default()).unwrap();
        processor.about_to_start(SAMPLE_RATE, BLOCK_SIZE);

        for index in 0..voices {
            let source = MemorySampleSource::new(generate_test_audio(2.0, 48000), 1, 48000);
            let voice = engine.voice(index as i32).unwrap();
            voice.load_source(Box::new(source)).unwrap();
            voice.set_looping(true).unwrap();
        }
        // Every row triggers the first voices at different pitches.
        for row in 0..ROWS {
            for column in 0..COLUMNS.min(voices) {
                let ratio = 0.5 + (row % 12) as f64 / 8.0;
                engine
                    .set_event(row, column, Event::new(ratio, column as i32, 0.5))
                    .unwrap();
            }
        }
        for index in 0..voices {
            engine.voice(index as i32).unwrap().set_playing(true);
        }
        engine.set_bpm(240).unwrap();
        engine.set_run_state(true);

        let mut output = vec![0.0f32; BLOCK_SIZE * 2];
        group.bench_with_input(BenchmarkId::new("voices", voices), &voices, |b, _| {
            b.iter(|| {
                processor.process(&[], black_box(&mut output), BLOCK_SIZE);
            })
        });

        engine.shutdown().unwrap();
    }

    group.finish();
}

criterion_group!(benches, benchmark_engine_blocks);
criterion_main!(benches);

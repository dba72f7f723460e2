//! Channel layout conversion on interleaved 16 bit samples.

/// Per input channel (left, right) weights in 1/1000 for downmixing 3 to 8
/// channels to stereo. Every column sums to 1000.
const STEREO_DOWNMIX: [&[(i32, i32)]; 6] = [
    // L R C
    &[(600, 0), (0, 600), (400, 400)],
    // L R Ls Rs
    &[(600, 0), (0, 600), (400, 0), (0, 400)],
    // L R Ls Rs C
    &[(500, 0), (0, 500), (200, 0), (0, 200), (300, 300)],
    // L R Ls Rs C LFE
    &[(400, 0), (0, 400), (200, 0), (0, 200), (300, 300), (100, 100)],
    // L R Ls Rs C RL RR
    &[(400, 0), (0, 400), (200, 0), (0, 200), (300, 300), (100, 0), (0, 100)],
    // L R Ls Rs C LFE RL RR
    &[
        (400, 0),
        (0, 400),
        (150, 0),
        (0, 150),
        (250, 250),
        (100, 100),
        (100, 0),
        (0, 100),
    ],
];

/// Converts `input` with `in_channels` to `out_channels`, replacing the
/// contents of `output`.
///
/// Layouts without a conversion produce silence of the right length.
pub fn remix(input: &[i16], in_channels: usize, output: &mut Vec<i16>, out_channels: usize) {
    output.clear();
    if in_channels == 0 || out_channels == 0 {
        return;
    }
    let frames = input.len() / in_channels;
    output.reserve(frames * out_channels);
    let frames_in = input.chunks_exact(in_channels);

    match (in_channels, out_channels) {
        (i, o) if i == o => output.extend_from_slice(&input[..frames * i]),
        (2, 1) => {
            output.extend(frames_in.map(|f| ((f[0] as i32 + f[1] as i32) / 2) as i16));
        }
        (1, 2) => {
            for f in frames_in {
                output.extend([f[0], f[0]]);
            }
        }
        (i, 2) if (3..=8).contains(&i) => {
            let weights = STEREO_DOWNMIX[i - 3];
            for f in frames_in {
                let (l, r) = f
                    .iter()
                    .zip(weights)
                    .fold((0i32, 0i32), |(l, r), (&s, &(wl, wr))| {
                        (l + s as i32 * wl, r + s as i32 * wr)
                    });
                output.extend([(l / 1000) as i16, (r / 1000) as i16]);
            }
        }
        (i, o) if i < o => {
            // keep the input channels, pad the rest with silence
            for f in frames_in {
                output.extend_from_slice(f);
                output.extend(std::iter::repeat(0).take(o - i));
            }
        }
        (i, o) => {
            log::error!("audio: unsupported {} -> {} channel remix", i, o);
            output.resize(frames * o, 0);
        }
    }
}

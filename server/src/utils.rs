use shared::protocol::Rgb;

/// Colours handed out to players, in order of preference.
pub const PALETTE: [Rgb; 16] = [
    Rgb::new(255, 0, 0),
    Rgb::new(0, 128, 255),
    Rgb::new(0, 200, 0),
    Rgb::new(255, 220, 0),
    Rgb::new(255, 0, 255),
    Rgb::new(0, 230, 230),
    Rgb::new(255, 128, 0),
    Rgb::new(160, 80, 255),
    Rgb::new(255, 255, 255),
    Rgb::new(128, 255, 128),
    Rgb::new(255, 128, 160),
    Rgb::new(128, 128, 0),
    Rgb::new(0, 128, 128),
    Rgb::new(128, 0, 0),
    Rgb::new(150, 150, 150),
    Rgb::new(90, 90, 255),
];

// Players keep the colour they already have; the rest take the least used
// palette entry, ties going to the earlier entry.
pub fn assign_colors(colors: &mut [Option<Rgb>]) {
    let mut users = [0usize; PALETTE.len()];
    for color in colors.iter().flatten() {
        if let Some(slot) = PALETTE.iter().position(|c| c == color) {
            users[slot] += 1;
        }
    }

    for color in colors.iter_mut().filter(|c| c.is_none()) {
        let mut best = 0;
        for slot in 1..PALETTE.len() {
            if users[slot] < users[best] {
                best = slot;
            }
        }
        users[best] += 1;
        *color = Some(PALETTE[best]);
    }
}

use image::Rgb;

/// Index of a color channel within an image.
///
/// Channel order follows the image data; by convention three-channel
/// data is stored blue, green, red.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    Channel0,
    Channel1,
    Channel2,
    Other(usize),
}

impl Channel {
    pub fn new(index: usize) -> Channel {
        match index {
            0 => Channel::Channel0,
            1 => Channel::Channel1,
            2 => Channel::Channel2,
            n => Channel::Other(n),
        }
    }

    pub fn index(self) -> usize {
        match self {
            Channel::Channel0 => 0,
            Channel::Channel1 => 1,
            Channel::Channel2 => 2,
            Channel::Other(n) => n,
        }
    }

    /// Display name of this channel in an image with `channel_count`
    /// channels.
    pub fn display_name(self, channel_count: usize) -> String {
        match (channel_count, self) {
            (1, _) => "Gray".into(),
            (3, Channel::Channel0) => "Blue".into(),
            (3, Channel::Channel1) => "Green".into(),
            (3, Channel::Channel2) => "Red".into(),
            (_, c) => format!("Ch {}", c.index()),
        }
    }

    /// Plot color of this channel in an image with `channel_count`
    /// channels.
    pub fn color(self, channel_count: usize) -> Rgb<u8> {
        match (channel_count, self) {
            (3, Channel::Channel0) => colors::BLUE,
            (3, Channel::Channel1) => colors::GREEN,
            (3, Channel::Channel2) => colors::RED,
            _ => colors::WHITE,
        }
    }

    /// Paler variant of `color()`, used for scattered observations.
    pub fn light_color(self, channel_count: usize) -> Rgb<u8> {
        match (channel_count, self) {
            (3, Channel::Channel0) => colors::LIGHT_BLUE,
            (3, Channel::Channel1) => colors::LIGHT_GREEN,
            (3, Channel::Channel2) => colors::LIGHT_RED,
            _ => colors::LIGHT_GRAY,
        }
    }
}

pub mod colors {
    use image::Rgb;

    pub const WHITE: Rgb<u8> = Rgb([220, 220, 220]);
    pub const RED: Rgb<u8> = Rgb([227, 26, 28]);
    pub const GREEN: Rgb<u8> = Rgb([51, 160, 44]);
    pub const BLUE: Rgb<u8> = Rgb([31, 120, 180]);

    pub const LIGHT_GRAY: Rgb<u8> = Rgb([240, 240, 240]);
    pub const LIGHT_RED: Rgb<u8> = Rgb([251, 154, 153]);
    pub const LIGHT_GREEN: Rgb<u8> = Rgb([178, 223, 138]);
    pub const LIGHT_BLUE: Rgb<u8> = Rgb([166, 206, 227]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(Channel::new(0).display_name(3), "Blue");
        assert_eq!(Channel::new(2).display_name(3), "Red");
        assert_eq!(Channel::new(0).display_name(1), "Gray");
        assert_eq!(Channel::new(4).display_name(5), "Ch 4");
        assert_eq!(Channel::new(4).index(), 4);
    }

    #[test]
    fn light_colors_are_paler() {
        for c in 0..3 {
            let (base, light) = (Channel::new(c).color(3), Channel::new(c).light_color(3));
            let sum = |p: Rgb<u8>| p.0.iter().map(|&v| v as u32).sum::<u32>();
            assert!(sum(light) > sum(base), "channel {}", c);
            let (lo, hi) = (base.0.iter().min(), light.0.iter().min());
            assert!(hi > lo, "channel {}", c);
        }
        assert!(Channel::new(0).light_color(1).0.iter().all(|&v| v >= 220));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const ORANGE: Color = Color { r: 0xff, g: 0x98, b: 0x00 };
    pub const GREEN: Color = Color { r: 0x4c, g: 0xaf, b: 0x50 };
    pub const BLUE: Color = Color { r: 0x21, g: 0x96, b: 0xf3 };

    pub fn to_hex_string(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex_string())
    }
}

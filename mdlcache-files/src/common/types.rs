#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Vector4 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

/// Builds an identifier the way the model tools do: first character in the lowest byte.
pub const fn fourcc(id: &[u8; 4]) -> u32 {
    ((id[3] as u32) << 24) + ((id[2] as u32) << 16) + ((id[1] as u32) << 8) + id[0] as u32
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub base_color: [f32; 3],
    pub metallic: f32,
    pub roughness: f32,
}

impl Material {
    pub fn new(name: String) -> Self {
        Self {
            name,
            base_color: [1.0, 1.0, 1.0],
            metallic: 0.0,
            roughness: 0.5,
        }
    }

    /// Tightly packed uniform payload: rgb, metallic, roughness, padding.
    pub fn uniform_data(&self) -> [f32; 8] {
        let [r, g, b] = self.base_color;
        [r, g, b, 1.0, self.metallic, self.roughness, 0.0, 0.0]
    }
}

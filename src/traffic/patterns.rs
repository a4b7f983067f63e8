use rand::rngs::StdRng;
use rand::Rng;
use serde::Deserialize;

/// How a source picks the destination of a new packet.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DestPattern {
    #[default]
    Uniform,
    /// `src + 1 mod nodes`
    Neighbor,
    /// `nodes - 1 - src`
    Complement,
}

impl DestPattern {
    /// Destination for `src`, never `src` itself while `nodes > 1`.
    pub fn dest(self, src: usize, nodes: usize, rng: &mut StdRng) -> usize {
        assert!(src < nodes, "source {} out of range [0, {})", src, nodes);
        if nodes == 1 {
            return src;
        }
        match self {
            DestPattern::Uniform => {
                let d = rng.gen_range(0..nodes - 1);
                if d >= src {
                    d + 1
                } else {
                    d
                }
            }
            DestPattern::Neighbor => (src + 1) % nodes,
            DestPattern::Complement => {
                let d = nodes - 1 - src;
                if d == src {
                    (src + 1) % nodes
                } else {
                    d
                }
            }
        }
    }
}

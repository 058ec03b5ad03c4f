//! Human-readable rendering of hashes, used in saved-state metadata so
//! operators can compare states across nodes at a glance.

use hashweave_types::Hash;

/// Number of words in a mnemonic.
pub const MNEMONIC_WORDS: usize = 4;

const WORDS: [&str; 256] = [
    "acid", "acorn", "actor", "adapt", "agent", "alarm", "album", "alert",
    "alien", "alley", "amber", "angle", "ankle", "apple", "april", "apron",
    "arena", "armor", "arrow", "aspen", "atlas", "audio", "autumn", "avocado",
    "badge", "bagel", "baker", "bamboo", "banjo", "barn", "basil", "beach",
    "beacon", "beard", "berry", "bison", "blade", "blaze", "bloom", "board",
    "bonus", "boost", "brave", "bread", "brick", "bridge", "brook", "brush",
    "bubble", "bucket", "cabin", "cable", "cactus", "camel", "candle", "canoe",
    "canyon", "carbon", "cargo", "carpet", "castle", "cedar", "cello", "chalk",
    "charm", "cherry", "chess", "chief", "cider", "cinema", "circle", "citrus",
    "clay", "cliff", "clock", "cloud", "clover", "cobalt", "cocoa", "comet",
    "coral", "cotton", "crane", "crater", "crisp", "crown", "crystal", "cube",
    "curve", "cypress", "daisy", "dance", "delta", "denim", "desert", "diamond",
    "dinner", "dolphin", "domain", "donkey", "dragon", "dream", "drift", "drum",
    "eagle", "echo", "eclipse", "elbow", "ember", "empire", "engine", "equal",
    "fabric", "falcon", "fancy", "feather", "fiber", "field", "flame", "flute",
    "focus", "forest", "fossil", "fox", "frame", "frost", "galaxy", "garden",
    "garlic", "gate", "gecko", "giant", "ginger", "glacier", "globe", "glove",
    "goose", "grain", "granite", "grape", "gravel", "guitar", "hammer", "harbor",
    "harvest", "hazel", "helmet", "herb", "heron", "honey", "horizon", "hotel",
    "husky", "igloo", "indigo", "island", "ivory", "jacket", "jaguar", "jasmine",
    "jelly", "jewel", "jungle", "kayak", "kernel", "kettle", "kiwi", "koala",
    "ladder", "lagoon", "lantern", "laser", "lemon", "lily", "linen", "lion",
    "lizard", "lobster", "locket", "lotus", "lunar", "magnet", "mango", "maple",
    "marble", "meadow", "melon", "meteor", "mint", "mirror", "mosaic", "motor",
    "mountain", "muffin", "museum", "napkin", "nectar", "needle", "nickel", "noble",
    "novel", "oasis", "ocean", "olive", "onion", "opal", "orbit", "orchid",
    "otter", "oyster", "paddle", "palace", "panda", "paper", "parrot", "pastel",
    "peach", "pebble", "pepper", "piano", "pilot", "planet", "plaza", "pocket",
    "polar", "poppy", "prism", "pulse", "pumpkin", "quartz", "quill", "rabbit",
    "radar", "raven", "reef", "ribbon", "river", "robin", "rocket", "saddle",
    "salmon", "satin", "scarf", "shadow", "shell", "silver", "sketch", "sparrow",
    "spice", "spiral", "spruce", "stamp", "storm", "summit", "sunset", "swan",
];

/// Four words derived from the first four bytes of the hash, joined by `-`.
pub fn mnemonic(hash: &Hash) -> String {
    hash.as_bytes()[..MNEMONIC_WORDS]
        .iter()
        .map(|byte| WORDS[*byte as usize])
        .collect::<Vec<_>>()
        .join("-")
}

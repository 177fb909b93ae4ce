use std::fs;
use std::ops::Index;
use std::path::Path;
use thiserror::Error;

/// Class names the bundled plant model was trained on, in output order.
pub const PLANT_LABELS: [&str; 47] = [
    "African Violet (Saintpaulia ionantha)",
    "Aloe Vera",
    "Anthurium (Anthurium andraeanum)",
    "Areca Palm (Dypsis lutescens)",
    "Asparagus Fern (Asparagus setaceus)",
    "Begonia (Begonia spp.)",
    "Bird of Paradise (Strelitzia reginae)",
    "Birds Nest Fern (Asplenium nidus)",
    "Boston Fern (Nephrolepis exaltata)",
    "Calathea",
    "Cast Iron Plant (Aspidistra elatior)",
    "Chinese Money Plant (Pilea peperomioides)",
    "Chinese evergreen (Aglaonema)",
    "Christmas Cactus (Schlumbergera bridgesii)",
    "Chrysanthemum",
    "Ctenanthe",
    "Daffodils (Narcissus spp.)",
    "Dracaena",
    "Dumb Cane (Dieffenbachia spp.)",
    "Elephant Ear (Alocasia spp.)",
    "English Ivy (Hedera helix)",
    "Hyacinth (Hyacinthus orientalis)",
    "Iron Cross begonia (Begonia masoniana)",
    "Jade plant (Crassula ovata)",
    "Kalanchoe",
    "Lilium (Hemerocallis)",
    "Lily of the valley (Convallaria majalis)",
    "Money Tree (Pachira aquatica)",
    "Monstera Deliciosa (Monstera deliciosa)",
    "Orchid",
    "Parlor Palm (Chamaedorea elegans)",
    "Peace lily",
    "Poinsettia (Euphorbia pulcherrima)",
    "Polka Dot Plant (Hypoestes phyllostachya)",
    "Ponytail Palm (Beaucarnea recurvata)",
    "Pothos (Ivy arum)",
    "Prayer Plant (Maranta leuconeura)",
    "Rattlesnake Plant (Calathea lancifolia)",
    "Rubber Plant (Ficus elastica)",
    "Sago Palm (Cycas revoluta)",
    "Schefflera",
    "Snake plant (Sanseviera)",
    "Tradescantia",
    "Tulip",
    "Venus Flytrap",
    "Yucca",
    "ZZ Plant (Zamioculcas zamiifolia)",
];

#[derive(Debug, Error)]
pub enum LabelError {
    #[error("label set is empty")]
    Empty,
    #[error("failed to read labels from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Ordered class names, indexed by classifier output position.
#[derive(Debug, Clone)]
pub struct LabelSet {
    labels: Vec<String>,
}

impl LabelSet {
    pub fn new(labels: Vec<String>) -> Result<Self, LabelError> {
        if labels.is_empty() {
            return Err(LabelError::Empty);
        }
        Ok(Self { labels })
    }

    /// The built-in plant species labels.
    pub fn plants() -> Self {
        Self {
            labels: PLANT_LABELS.iter().map(|l| l.to_string()).collect(),
        }
    }

    /// Read one label per line; blank lines are skipped.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LabelError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| LabelError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::new(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

impl Index<usize> for LabelSet {
    type Output = str;

    fn index(&self, index: usize) -> &str {
        &self.labels[index]
    }
}

/// Output classes of the classifier, in model output order.
pub const DISEASE_CLASSES: [&str; 5] = [
    "Early Blight",
    "Late Blight",
    "Healthy",
    "Powdery Mildew",
    "Leaf Spot",
];

#[derive(Debug, Clone)]
pub struct ClassLabels {
    labels: Vec<String>,
}

impl ClassLabels {
    pub fn new(labels: &[&str]) -> Self {
        Self {
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.labels
    }
}

impl Default for ClassLabels {
    fn default() -> Self {
        Self::new(&DISEASE_CLASSES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_labels_keep_model_order() {
        let labels = ClassLabels::default();

        assert_eq!(labels.len(), 5);
        assert_eq!(labels.get(0), Some("Early Blight"));
        assert_eq!(labels.get(2), Some("Healthy"));
        assert_eq!(labels.get(4), Some("Leaf Spot"));
        assert_eq!(labels.get(5), None);
    }
}

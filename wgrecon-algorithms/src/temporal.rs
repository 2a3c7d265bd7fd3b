//! Bunch-crossing and corrected-time clustering.

use wgrecon_core::{EventConfig, Hit, ReconConfig, TimeCorrection};

/// Hits of one event that are coincident in time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeCluster {
    pub id: usize,
    /// Index of the bunch-crossing cluster this came from.
    pub bcid_cluster: usize,
    /// Hit indices in store order.
    pub hits: Vec<usize>,
    pub mean_time: f64,
}

/// Two-level temporal clustering.
///
/// Hits are first split into runs of nearby bunch crossings, then each run is
/// split into windows of mutually close corrected times.
#[derive(Debug, Clone)]
pub struct TemporalClustering {
    config: EventConfig,
    correction: Option<TimeCorrection>,
}

impl TemporalClustering {
    /// Creates a clusterer from the event section of `config`.
    #[must_use]
    pub fn new(config: &ReconConfig) -> Self {
        Self {
            config: config.event.clone(),
            correction: config.time_correction.clone(),
        }
    }

    /// Corrected time of a hit.
    #[must_use]
    pub fn corrected_time(&self, hit: &Hit) -> f64 {
        match &self.correction {
            Some(tc) => tc.apply(hit.bcid, hit.raw_time, hit.capacitor_slot),
            None => hit.corrected_time,
        }
    }

    /// Partitions bcid-sorted hits into runs whose consecutive bcids differ
    /// by at most the configured gap.
    ///
    /// Returns `false`, leaving `out` empty, when the event has fewer hits
    /// than the minimum or no run is large enough.
    pub fn find_bcid_clusters(&self, hits: &[Hit], out: &mut Vec<Vec<usize>>) -> bool {
        out.clear();
        if hits.len() < self.config.min_event_hits || hits.is_empty() {
            return false;
        }

        let mut current: Vec<usize> = vec![0];
        for i in 1..hits.len() {
            if hits[i].bcid.saturating_sub(hits[i - 1].bcid) > self.config.max_bcid_gap {
                self.close_run(&mut current, out);
            }
            current.push(i);
        }
        self.close_run(&mut current, out);

        !out.is_empty()
    }

    fn close_run(&self, run: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if run.len() >= self.config.min_cluster_hits {
            out.push(std::mem::take(run));
        } else {
            run.clear();
        }
    }

    /// Splits each bunch-crossing cluster into corrected-time windows.
    ///
    /// A window opens at its earliest hit and closes before the first hit
    /// later than the tolerance. `times` receives the corrected time of
    /// every hit. Each time cluster keeps its hits in store order.
    pub fn find_time_clusters(
        &self,
        hits: &[Hit],
        bcid_clusters: &[Vec<usize>],
        times: &mut Vec<f64>,
        out: &mut Vec<TimeCluster>,
    ) -> bool {
        out.clear();
        times.clear();
        times.extend(hits.iter().map(|h| self.corrected_time(h)));

        for (bcid_cluster, members) in bcid_clusters.iter().enumerate() {
            let mut order = members.clone();
            order.sort_by(|&a, &b| times[a].total_cmp(&times[b]).then(a.cmp(&b)));

            let mut current: Vec<usize> = Vec::new();
            for &i in &order {
                if let Some(&seed) = current.first() {
                    if times[i] - times[seed] > self.config.time_tolerance_ns {
                        self.close_time_cluster(bcid_cluster, &mut current, times, out);
                    }
                }
                current.push(i);
            }
            self.close_time_cluster(bcid_cluster, &mut current, times, out);
        }

        !out.is_empty()
    }

    fn close_time_cluster(
        &self,
        bcid_cluster: usize,
        current: &mut Vec<usize>,
        times: &[f64],
        out: &mut Vec<TimeCluster>,
    ) {
        if current.len() < self.config.min_cluster_hits {
            current.clear();
            return;
        }
        let mut hits = std::mem::take(current);
        hits.sort_unstable();
        #[allow(clippy::cast_precision_loss)]
        let mean_time = hits.iter().map(|&i| times[i]).sum::<f64>() / hits.len() as f64;
        out.push(TimeCluster {
            id: out.len(),
            bcid_cluster,
            hits,
            mean_time,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hits_with_bcids(bcids: &[u32]) -> Vec<Hit> {
        bcids
            .iter()
            .enumerate()
            .map(|(i, &b)| Hit::new(b, 0, 0, u8::try_from(i).unwrap()))
            .collect()
    }

    #[test]
    fn test_bcid_gap_excludes_outlier() {
        let algo = TemporalClustering::new(&ReconConfig::default());
        let hits = hits_with_bcids(&[10, 10, 11, 50]);
        let mut out = Vec::new();

        assert!(algo.find_bcid_clusters(&hits, &mut out));
        assert_eq!(out, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_bcid_too_few_hits() {
        let algo = TemporalClustering::new(&ReconConfig::default());
        let hits = hits_with_bcids(&[10, 10, 11]);
        let mut out = vec![vec![99]];

        assert!(!algo.find_bcid_clusters(&hits, &mut out));
        assert!(out.is_empty());
        assert!(!algo.find_bcid_clusters(&[], &mut out));
    }

    #[test]
    fn test_time_split() {
        let config = ReconConfig::default()
            .with_time_correction(None)
            .with_time_tolerance(20.0);
        let algo = TemporalClustering::new(&config);
        let hits: Vec<Hit> = [100.0, 300.0, 110.0, 305.0, 120.0, 900.0]
            .iter()
            .map(|&t| Hit::new(4, 0, 0, 0).with_time(t))
            .collect();

        let mut times = Vec::new();
        let mut out = Vec::new();
        assert!(algo.find_time_clusters(&hits, &[vec![0, 1, 2, 3, 4, 5]], &mut times, &mut out));

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].hits, vec![0, 2, 4]);
        assert_eq!(out[1].hits, vec![1, 3]);
        assert!((out[0].mean_time - 110.0).abs() < 1e-9);
        assert_eq!(out[1].id, 1);
    }

    #[test]
    fn test_time_drift_does_not_chain() {
        let config = ReconConfig::default()
            .with_time_correction(None)
            .with_time_tolerance(100.0);
        let algo = TemporalClustering::new(&config);
        let hits: Vec<Hit> = [0.0, 90.0, 180.0, 270.0, 360.0]
            .iter()
            .map(|&t| Hit::new(4, 0, 0, 0).with_time(t))
            .collect();

        let mut times = Vec::new();
        let mut out = Vec::new();
        assert!(algo.find_time_clusters(&hits, &[vec![0, 1, 2, 3, 4]], &mut times, &mut out));

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].hits, vec![0, 1]);
        assert_eq!(out[1].hits, vec![2, 3]);
        for tc in &out {
            let spread = tc.hits.iter().map(|&h| times[h]).fold(f64::MIN, f64::max)
                - tc.hits.iter().map(|&h| times[h]).fold(f64::MAX, f64::min);
            assert!(spread <= 100.0);
        }
    }

    #[test]
    fn test_time_correction_applied() {
        let algo = TemporalClustering::new(&ReconConfig::default());
        let even = Hit::new(1, 0, 0, 0).with_readout(0, 0, 0, 2).with_signal(0, true, 500);
        let odd = Hit::new(1, 0, 0, 0).with_readout(0, 0, 0, 3).with_signal(0, true, 3900);
        assert!((algo.corrected_time(&even) - 680.0).abs() < 1e-9);
        assert!((algo.corrected_time(&odd) - 680.0).abs() < 1e-9);
    }
}

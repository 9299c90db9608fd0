use super::detector::Descriptor;
use bitarray::Hamming;
use space::{Knn, LinearKnn, Metric};

/// A descriptor pair: `query` indexes the first set, `train` the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub query: usize,
    pub train: usize,
    pub distance: u32,
}

pub fn hamming(a: &Descriptor, b: &Descriptor) -> u32 {
    Hamming.distance(a, b)
}

/// Index and distance of the nearest candidate for every descriptor.
fn nearest(descriptors: &[Descriptor], candidates: &[Descriptor]) -> Vec<Option<(usize, u32)>> {
    let knn = LinearKnn {
        metric: Hamming,
        iter: candidates.iter(),
    };
    descriptors
        .iter()
        .map(|descriptor| {
            knn.knn(descriptor, 1)
                .first()
                .map(|neighbor| (neighbor.index, neighbor.distance))
        })
        .collect()
}

/// Nearest neighbours kept only when each side is the other's best match,
/// sorted by ascending distance.
pub fn cross_check_match(a: &[Descriptor], b: &[Descriptor]) -> Vec<Match> {
    let forward = nearest(a, b);
    let reverse: Vec<Option<usize>> = nearest(b, a)
        .into_iter()
        .map(|best| best.map(|(index, _)| index))
        .collect();

    let mut matches: Vec<Match> = forward
        .into_iter()
        .enumerate()
        .filter_map(|(query, best)| {
            best.filter(|&(train, _)| reverse[train] == Some(query))
                .map(|(train, distance)| Match {
                    query,
                    train,
                    distance,
                })
        })
        .collect();
    matches.sort_by_key(|m| (m.distance, m.query));
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitarray::BitArray;

    fn descriptor(fill: u8) -> Descriptor {
        BitArray::new([fill; 64])
    }

    #[test]
    fn test_hamming_distance() {
        assert_eq!(hamming(&descriptor(0), &descriptor(0)), 0);
        assert_eq!(hamming(&descriptor(0), &descriptor(0xff)), 512);
        assert_eq!(hamming(&descriptor(0b1010), &descriptor(0b0110)), 128);
    }

    #[test]
    fn test_cross_check_drops_one_sided_matches() {
        // a0 and a1 both prefer b0, which prefers a1
        let mut near = [0u8; 64];
        near[0] = 0b1;
        let a = [BitArray::new(near), descriptor(0), descriptor(0xff)];
        let b = [descriptor(0), descriptor(0xfe)];

        let matches = cross_check_match(&a, &b);
        assert_eq!(matches.len(), 2);
        assert_eq!(
            matches[0],
            Match {
                query: 1,
                train: 0,
                distance: 0
            }
        );
        assert_eq!(matches[1].query, 2);
        assert_eq!(matches[1].train, 1);
        assert_eq!(matches[1].distance, 64);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(cross_check_match(&[], &[descriptor(1)]).is_empty());
        assert!(cross_check_match(&[descriptor(1)], &[]).is_empty());
    }
}

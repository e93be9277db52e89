//! Property checks for embedding matching.

use evidence_screener::identity::IdentityMatcher;
use rand::Rng;

fn random_vector(rng: &mut impl Rng, dim: usize) -> Vec<f32> {
    (0..dim).map(|_| rng.random_range(-1.0f32..1.0)).collect()
}

#[test]
fn self_similarity_is_one_for_random_embeddings() {
    let mut rng = rand::rng();
    let matcher = IdentityMatcher::new(0.6);
    for i in 0..20 {
        let v = random_vector(&mut rng, 128);
        let id = format!("p{i}");
        matcher.register_identity(&id, &v).unwrap();
        let matches = matcher.match_probe(&v).unwrap();
        let own = matches.iter().find(|m| m.id == id).expect("self match");
        assert!((own.similarity - 1.0).abs() < 1e-5);
        assert!(own.similarity <= 1.0 + 1e-6);
    }
}

#[test]
fn scaling_a_probe_does_not_change_similarity() {
    let mut rng = rand::rng();
    let matcher = IdentityMatcher::new(0.0);
    let v = random_vector(&mut rng, 64);
    matcher.register_identity("p", &v).unwrap();

    let probe = random_vector(&mut rng, 64);
    let scaled: Vec<f32> = probe.iter().map(|x| x * 7.5).collect();
    let a = matcher.match_probe(&probe).unwrap();
    let b = matcher.match_probe(&scaled).unwrap();
    match (a.first(), b.first()) {
        (Some(ma), Some(mb)) => assert!((ma.similarity - mb.similarity).abs() < 1e-5),
        (None, None) => {}
        _ => panic!("scaling changed match outcome"),
    }
}

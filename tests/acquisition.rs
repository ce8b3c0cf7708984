//! End-to-end acquisition tests: scan vs. direct convolution, bleaching
//! order sensitivity, cache round trips and edge handling.

use ndarray::Array2;

use nanoscope::image_proc::stack;
use nanoscope::{
    Datamap, Detector, DonutBeam, Fluorophore, GaussianBeam, Microscope, Objective, RescuePolicy,
    ScanConfig,
};

/// 50 nm pixels keep the diffraction grids small enough for fast tests.
const PIXELSIZE: f64 = 50e-9;

/// Microscope with an ideal detector (every emitted photon is detected), so
/// the signal path is deterministic outside of bleaching.
fn ideal_microscope() -> Microscope {
    let detector = Detector {
        pcef: 1.0,
        pdef: 1.0,
        ..Detector::default()
    };
    Microscope::new(
        GaussianBeam::new(488e-9),
        DonutBeam::new(575e-9),
        detector,
        Objective::default(),
        Fluorophore::default(),
    )
}

fn default_microscope() -> Microscope {
    Microscope::new(
        GaussianBeam::new(488e-9),
        DonutBeam::new(575e-9),
        Detector::default(),
        Objective::default(),
        Fluorophore::default(),
    )
}

fn hotspot_datamap(shape: (usize, usize), spots: &[((usize, usize), u64)]) -> Datamap {
    let mut grid = Array2::<u64>::zeros(shape);
    for &((row, col), count) in spots {
        grid[[row, col]] = count;
    }
    Datamap::new(grid, PIXELSIZE)
}

#[test]
fn raster_scan_without_bleach_matches_stack_reference() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut scope = ideal_microscope();

    let mut sample = hotspot_datamap((24, 24), &[((6, 7), 4), ((12, 12), 9), ((18, 5), 2)]);
    let reference_grid = sample.molecules().clone();

    // Unit dwell and a perfect detector make the image the photon floor of
    // the accumulated intensity.
    let mut config = ScanConfig::new(PIXELSIZE, 1e-6, 0.0, 1.0);
    config.bleach = false;
    config.seed = Some(1);

    let acquisition = scope.acquire(&mut sample, &config).unwrap();

    let kernel = scope.effective_kernel(PIXELSIZE, 1e-6, 0.0).unwrap();
    let expected = scope.fluo.photon_counts(&stack(&reference_grid, &kernel));

    assert_eq!(acquisition.image.dim(), (24, 24));
    for ((r, c), &expected_counts) in expected.indexed_iter() {
        let got = acquisition.image[[r, c]];
        // The scan gathers and the reference scatters, so the sums may
        // differ in the last ulp; after the photon floor that is at most
        // one whole photon.
        assert!(
            (got - expected_counts).abs() <= 1.0 + 1e-9 * expected_counts,
            "pixel ({r}, {c}): scan gave {got}, stack reference {expected_counts}"
        );
    }
    // Bleaching disabled: the sample is untouched.
    assert_eq!(*sample.molecules(), reference_grid);
}

#[test]
fn bleaching_scan_is_order_sensitive() {
    let _ = env_logger::builder().is_test(true).try_init();

    // Two hotspots inside each other's kernel support.
    let spots = [((10, 10), 400u64), ((10, 14), 400u64)];
    let mut forward_sample = hotspot_datamap((21, 21), &spots);
    let mut reverse_sample = hotspot_datamap((21, 21), &spots);

    let mut config = ScanConfig::new(PIXELSIZE, 5e-6, 0.0, 50e-6);
    config.seed = Some(99);

    let forward_order: Vec<(usize, usize)> = (0..21)
        .flat_map(|r| (0..21).map(move |c| (r, c)))
        .collect();
    let mut reverse_order = forward_order.clone();
    reverse_order.reverse();

    let mut forward_scope = default_microscope();
    config.pixel_list = Some(forward_order);
    forward_scope.acquire(&mut forward_sample, &config).unwrap();

    let mut reverse_scope = default_microscope();
    config.pixel_list = Some(reverse_order);
    reverse_scope.acquire(&mut reverse_sample, &config).unwrap();

    let forward_total = forward_sample.total();
    let reverse_total = reverse_sample.total();
    println!("forward survivors: {forward_total}, reverse survivors: {reverse_total}");

    assert!(forward_total < 800, "forward scan should bleach molecules");
    assert!(reverse_total < 800, "reverse scan should bleach molecules");
    assert_ne!(
        *forward_sample.molecules(),
        *reverse_sample.molecules(),
        "scan order must leave a different bleaching footprint"
    );
}

#[test]
fn fixed_seed_reproduces_bit_identical_acquisitions() {
    let detector = Detector {
        noise: true,
        background: 200.0,
        darkcount: 20.0,
        ..Detector::default()
    };
    let build = || {
        Microscope::new(
            GaussianBeam::new(488e-9),
            DonutBeam::new(575e-9),
            detector.clone(),
            Objective::default(),
            Fluorophore::default(),
        )
    };

    let spots = [((8, 8), 120u64), ((15, 4), 60u64)];
    let mut sample_a = hotspot_datamap((20, 20), &spots);
    let mut sample_b = hotspot_datamap((20, 20), &spots);

    let mut config = ScanConfig::new(PIXELSIZE, 2e-6, 10e-3, 20e-6);
    config.seed = Some(1234);

    let a = build().acquire(&mut sample_a, &config).unwrap();
    let b = build().acquire(&mut sample_b, &config).unwrap();

    assert_eq!(a.image, b.image);
    assert_eq!(sample_a, sample_b);
}

#[test]
fn cache_invalidation_round_trips_the_acquisition() {
    let mut scope = ideal_microscope();
    let mut config = ScanConfig::new(PIXELSIZE, 1e-6, 5e-3, 1.0);
    config.bleach = false;
    config.seed = Some(7);

    let mut sample = hotspot_datamap((16, 16), &[((8, 8), 25)]);
    let before = scope.acquire(&mut sample, &config).unwrap();

    scope.clear_cache();

    let mut sample = hotspot_datamap((16, 16), &[((8, 8), 25)]);
    let after = scope.acquire(&mut sample, &config).unwrap();

    assert_eq!(before.image, after.image);
}

#[test]
fn corner_molecule_participates_through_the_zero_padding() {
    let mut scope = ideal_microscope();
    let mut config = ScanConfig::new(PIXELSIZE, 1e-6, 0.0, 1.0);
    config.bleach = false;
    config.seed = Some(3);

    let mut sample = hotspot_datamap((12, 12), &[((0, 0), 50), ((11, 11), 50)]);
    let acquisition = scope.acquire(&mut sample, &config).unwrap();

    assert!(
        acquisition.image[[0, 0]] > 0.0,
        "corner pixel must accumulate signal from its own molecules"
    );
    assert!(acquisition.image[[11, 11]] > 0.0);

    // Same scan with bleaching: the corner neighbourhoods must be bleached
    // through the padding without any out-of-range access.
    let mut sample = hotspot_datamap((12, 12), &[((0, 0), 50), ((11, 11), 50)]);
    config.bleach = true;
    scope.acquire(&mut sample, &config).unwrap();
    assert!(sample.molecules()[[0, 0]] < 50);
    assert!(sample.molecules()[[11, 11]] < 50);
}

#[test]
fn single_molecule_peak_follows_the_kernel_peak() {
    // 32x32 grid, 5 molecules at the center, excitation-only kernel, no
    // bleaching, ideal noiseless detector.
    let mut scope = ideal_microscope();
    let mut config = ScanConfig::new(PIXELSIZE, 1e-6, 0.0, 1.0);
    config.bleach = false;
    config.seed = Some(5);

    let mut sample = hotspot_datamap((32, 32), &[((16, 16), 5)]);
    let acquisition = scope.acquire(&mut sample, &config).unwrap();

    let kernel = scope.effective_kernel(PIXELSIZE, 1e-6, 0.0).unwrap();
    let kernel_peak = kernel.iter().fold(f64::NEG_INFINITY, |m, &v| m.max(v));
    let expected_peak = scope.fluo.photon_count(5.0 * kernel_peak);

    let (mut peak_pos, mut peak) = ((0, 0), f64::NEG_INFINITY);
    for ((r, c), &v) in acquisition.image.indexed_iter() {
        if v > peak {
            peak = v;
            peak_pos = (r, c);
        }
    }
    assert_eq!(peak_pos, (16, 16));
    assert!(
        (peak - expected_peak).abs() < 1e-9,
        "peak {peak} should equal detect(photon_count(5 * kernel_peak)) = {expected_peak}"
    );
}

#[test]
fn pixel_ratio_strides_the_acquisition_grid() {
    let mut scope = ideal_microscope();
    // 150 nm acquisition pixels over a 50 nm datamap: ratio 3.
    let mut config = ScanConfig::new(3.0 * PIXELSIZE, 1e-6, 0.0, 1.0);
    config.bleach = false;
    config.seed = Some(11);

    let mut sample = hotspot_datamap((33, 33), &[((15, 15), 30)]);
    let acquisition = scope.acquire(&mut sample, &config).unwrap();

    assert_eq!(acquisition.image.dim(), (11, 11));
    assert_eq!(acquisition.dwell.dim(), (11, 11));
    assert!(acquisition.image[[5, 5]] > 0.0);
}

#[test]
fn non_integer_pixel_ratio_is_rejected() {
    let mut scope = default_microscope();
    let config = ScanConfig::new(1.5 * PIXELSIZE, 1e-6, 0.0, 10e-6);
    let mut sample = hotspot_datamap((8, 8), &[]);
    assert!(scope.acquire(&mut sample, &config).is_err());
}

#[test]
fn off_grid_pixel_list_falls_back_to_full_raster() {
    let mut scope = ideal_microscope();
    let mut sample_requested = hotspot_datamap((12, 12), &[((6, 6), 40)]);
    let mut sample_raster = hotspot_datamap((12, 12), &[((6, 6), 40)]);

    let mut config = ScanConfig::new(2.0 * PIXELSIZE, 1e-6, 0.0, 1.0);
    config.bleach = false;
    config.seed = Some(21);

    // Every requested pixel is off the 2x laser grid.
    config.pixel_list = Some(vec![(1, 1), (3, 3), (5, 7)]);
    let requested = scope.acquire(&mut sample_requested, &config).unwrap();

    config.pixel_list = None;
    let raster = scope.acquire(&mut sample_raster, &config).unwrap();

    assert_eq!(requested.image, raster.image);
}

#[test]
fn standalone_bleach_spares_the_sample_at_zero_power() {
    let mut scope = default_microscope();
    let mut sample = hotspot_datamap((16, 16), &[((8, 8), 100), ((3, 12), 50)]);
    let pristine = sample.clone();

    let mut config = ScanConfig::new(PIXELSIZE, 0.0, 0.0, 100e-6);
    config.seed = Some(17);
    scope.bleach(&mut sample, &config).unwrap();

    assert_eq!(sample, pristine, "zero power must not bleach");
}

#[test]
fn standalone_bleach_removes_molecules_under_power() {
    let mut scope = default_microscope();
    let mut sample = hotspot_datamap((16, 16), &[((8, 8), 500)]);
    let pristine = sample.clone();

    let mut config = ScanConfig::new(PIXELSIZE, 10e-6, 0.0, 100e-6);
    config.seed = Some(17);
    scope.bleach(&mut sample, &config).unwrap();

    let survival = sample.survival_ratio(&pristine);
    println!("survival after bleach-only exposure: {survival:.3}");
    assert!(survival < 1.0, "strong exposure must bleach molecules");
}

#[test]
fn adaptive_dwell_leaves_dim_pixels_early() {
    let mut scope = default_microscope();
    let policy = RescuePolicy::default();
    let full_dwell = 10e-6;

    // Empty sample: every probe detects nothing, so the policy should cut
    // the dwell by its lower divisor everywhere.
    let mut sample = hotspot_datamap((10, 10), &[]);
    let mut config = ScanConfig::new(PIXELSIZE, 1e-6, 0.0, full_dwell);
    config.seed = Some(31);

    let acquisition = scope
        .acquire_adaptive(&mut sample, &config, &policy)
        .unwrap();

    for &dwell in acquisition.dwell.iter() {
        assert!(
            (dwell - full_dwell / policy.lower_divisor).abs() < 1e-18,
            "dim pixels should be abandoned after dwell {dwell}"
        );
    }
}

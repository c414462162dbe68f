//! Calibration between the engine's internal field of view and the value shown in the settings menu

use super::FovPair;

/// Measured `(internal, display)` pairs, strictly increasing on both axes
pub static FOV_TABLE: [FovPair; 36] = [
    FovPair::new(0.33750209, 0.0),
    FovPair::new(3.15171504, 5.0),
    FovPair::new(5.97414541, 10.0),
    FovPair::new(8.81220150, 15.0),
    FovPair::new(11.67340946, 20.0),
    FovPair::new(14.56548882, 25.0),
    FovPair::new(17.49640465, 30.0),
    FovPair::new(20.47442627, 35.0),
    FovPair::new(23.50821114, 40.0),
    FovPair::new(26.60686302, 45.0),
    FovPair::new(29.77999878, 50.0),
    FovPair::new(33.03782654, 55.0),
    FovPair::new(36.39122391, 60.0),
    FovPair::new(39.85181808, 65.0),
    FovPair::new(43.43202972, 70.0),
    FovPair::new(47.14517975, 75.0),
    FovPair::new(51.00551605, 80.0),
    FovPair::new(55.02826691, 85.0),
    FovPair::new(59.22966766, 90.0),
    FovPair::new(63.62687683, 95.0),
    FovPair::new(68.23798370, 100.0),
    FovPair::new(73.08179474, 105.0),
    FovPair::new(78.17757416, 110.0),
    FovPair::new(83.54468536, 115.0),
    FovPair::new(89.20195007, 120.0),
    FovPair::new(95.16699982, 125.0),
    FovPair::new(101.45520020, 130.0),
    FovPair::new(108.07840730, 135.0),
    FovPair::new(115.04350280, 140.0),
    FovPair::new(122.35076900, 145.0),
    FovPair::new(129.99212650, 150.0),
    FovPair::new(137.94955440, 155.0),
    FovPair::new(146.19392390, 160.0),
    FovPair::new(154.68443290, 165.0),
    FovPair::new(163.36904910, 170.0),
    FovPair::new(172.18605040, 175.0),
];

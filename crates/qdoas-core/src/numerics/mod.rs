pub mod bessel;
pub mod fft;
pub mod filter;
pub mod linalg;
pub mod optimize;
pub mod polynomial;
pub mod spline;
pub mod vector;

pub use bessel::bessel_i0;
pub use fft::{FftError, circular_convolution, fft_forward, fft_inverse, next_power_of_two, real_fft};
pub use filter::{
    EdgePolicy, Filter, FilterError, FilterKind, FilterMode, FilterSettings,
    apply_filter_convolution, apply_filter_fft, build_filter, kaiser_beta,
};
pub use linalg::{
    DenseMatrix, LeastSquaresError, LeastSquaresSolution, LuDecomposition, LuError,
    SvdDecomposition, SvdError, lu_factorize, lu_solve, solve_least_squares, svd_decompose,
};
pub use optimize::{MinimizerSettings, NonLinearOutcome, NonLinearProblem, minimize};
pub use polynomial::{
    eval_polynomial, eval_polynomial_derivative, eval_polynomial_f32, fit_polynomial,
};
pub use spline::{
    CubicSpline, InterpolationMode, SplineBoundary, SplineError, spline_interpolate,
    spline_interpolate_vector, spline_second_derivatives,
};
pub use vector::{
    dot, first_non_increasing, is_strictly_increasing, vector_invert, vector_locate, vector_max,
    vector_mean, vector_min, vector_nearest, vector_norm,
};

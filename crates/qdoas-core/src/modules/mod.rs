pub mod analysis;
pub mod batch;
pub mod convolution;
pub mod cross_section;
pub mod fit;
pub mod kurucz;
pub mod reference;

//! View operations through the ABI: reshape, transpose, slice,
//! make_contiguous

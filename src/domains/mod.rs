pub mod redemption;

pub mod iter_csv;

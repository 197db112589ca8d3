mod batch_test;
mod increment_test;

mod postgres_replication_test;
